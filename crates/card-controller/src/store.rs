//! Participant store.
//!
//! The channel core only ever reads the roster through [`ParticipantStore`].
//! [`InMemoryStore`] implements it and adds the user, meeting and membership
//! CRUD the REST surface needs. Nothing here is durable: a restart forgets
//! every meeting.

use crate::errors::CcError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Length of a meeting short code.
pub const SHORT_CODE_LENGTH: usize = 6;

/// Attempts at drawing an unused short code before giving up.
const SHORT_CODE_ATTEMPTS: usize = 16;

const SHORT_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Display names handed to simulated participants.
const SIMULATED_FIRST_NAMES: &[&str] = &[
    "Aiko", "Amira", "Bao", "Dmitri", "Elena", "Hana", "Jae-won", "James", "Layla", "Li Na",
    "Maria", "Min-jun", "Omar", "Sakura", "Sofia", "Wei", "Yusuf", "Zoya",
];
const SIMULATED_LAST_NAMES: &[&str] = &[
    "Al-Farsi", "Chen", "Ivanova", "Johnson", "Kim", "Kuznetsov", "Nakamura", "Park", "Rahman",
    "Smith", "Tanaka", "Wang", "Williams", "Zhang",
];

/// Participant role within a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Member,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Member => "member",
        }
    }
}

/// One participation of a user in a meeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantRecord {
    /// Participation ID (the `pid` clients send).
    pub id: Uuid,
    /// Short code of the owning meeting.
    pub meeting_code: String,
    /// Owning user.
    pub user_id: Uuid,
    /// Display name within this meeting.
    pub name: String,
    pub role: Role,
    /// Driven by the simulation driver rather than a person.
    pub simulated: bool,
}

/// An anonymous user identity. The user ID doubles as the bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub last_used_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meeting {
    pub id: Uuid,
    pub short_code: String,
    pub name: String,
    pub anonymous: bool,
    pub created_at: DateTime<Utc>,
}

/// Read access to meeting rosters (enables mocking).
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Look up a participation by ID.
    async fn resolve_participant(&self, id: Uuid) -> Result<Option<ParticipantRecord>, CcError>;

    /// Current roster of a meeting, in join order.
    async fn list_participants(&self, meeting_code: &str)
        -> Result<Vec<ParticipantRecord>, CcError>;
}

/// Process-local store for users, meetings and participations.
///
/// Cloning is cheap and clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Debug, Default)]
struct StoreInner {
    users: HashMap<Uuid, User>,
    meetings: HashMap<String, Meeting>,
    /// All participations, in creation order.
    participations: Vec<ParticipantRecord>,
}

impl StoreInner {
    fn remember_name(&mut self, user_id: Uuid, name: &str) -> Result<(), CcError> {
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| CcError::Store(format!("user {user_id} does not exist")))?;
        user.last_used_name = Some(name.to_string());
        Ok(())
    }

    fn participation_mut(
        &mut self,
        meeting_code: &str,
        participation_id: Uuid,
    ) -> Result<&mut ParticipantRecord, CcError> {
        self.participations
            .iter_mut()
            .find(|p| p.id == participation_id && p.meeting_code == meeting_code)
            .ok_or_else(|| CcError::ParticipantNotFound(participation_id.to_string()))
    }

    fn require_meeting(&self, meeting_code: &str) -> Result<(), CcError> {
        if self.meetings.contains_key(meeting_code) {
            Ok(())
        } else {
            Err(CcError::MeetingNotFound(meeting_code.to_string()))
        }
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh anonymous user.
    pub async fn create_user(&self) -> Result<User, CcError> {
        let user = User {
            id: Uuid::new_v4(),
            last_used_name: None,
            created_at: Utc::now(),
        };
        self.inner.write().await.users.insert(user.id, user.clone());

        debug!(target: "cc.store", user_id = %user.id, "User created");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, CcError> {
        Ok(self.inner.read().await.users.get(&user_id).cloned())
    }

    /// Create a meeting with `host_user_id` as its host.
    ///
    /// Returns the meeting and the host's participation.
    pub async fn create_meeting(
        &self,
        host_user_id: Uuid,
        meeting_name: &str,
        user_name: &str,
        anonymous: bool,
    ) -> Result<(Meeting, ParticipantRecord), CcError> {
        let mut inner = self.inner.write().await;

        let short_code = unused_short_code(&inner.meetings)?;
        inner.remember_name(host_user_id, user_name)?;

        let meeting = Meeting {
            id: Uuid::new_v4(),
            short_code: short_code.clone(),
            name: meeting_name.to_string(),
            anonymous,
            created_at: Utc::now(),
        };
        let host = ParticipantRecord {
            id: Uuid::new_v4(),
            meeting_code: short_code.clone(),
            user_id: host_user_id,
            name: user_name.to_string(),
            role: Role::Host,
            simulated: false,
        };

        inner.meetings.insert(short_code.clone(), meeting.clone());
        inner.participations.push(host.clone());

        debug!(
            target: "cc.store",
            meeting_code = %short_code,
            host_id = %host.id,
            "Meeting created"
        );
        Ok((meeting, host))
    }

    pub async fn get_meeting(&self, meeting_code: &str) -> Result<Option<Meeting>, CcError> {
        Ok(self.inner.read().await.meetings.get(meeting_code).cloned())
    }

    /// The participation of `user_id` in `meeting_code`, if any.
    pub async fn find_participation(
        &self,
        meeting_code: &str,
        user_id: Uuid,
    ) -> Result<Option<ParticipantRecord>, CcError> {
        Ok(self
            .inner
            .read()
            .await
            .participations
            .iter()
            .find(|p| p.meeting_code == meeting_code && p.user_id == user_id)
            .cloned())
    }

    /// Join `meeting_code` as a member, or rename an existing participation.
    pub async fn join_meeting(
        &self,
        meeting_code: &str,
        user_id: Uuid,
        user_name: &str,
    ) -> Result<ParticipantRecord, CcError> {
        let mut inner = self.inner.write().await;
        inner.require_meeting(meeting_code)?;
        inner.remember_name(user_id, user_name)?;

        if let Some(existing) = inner
            .participations
            .iter_mut()
            .find(|p| p.meeting_code == meeting_code && p.user_id == user_id)
        {
            existing.name = user_name.to_string();
            debug!(
                target: "cc.store",
                meeting_code = %meeting_code,
                participation_id = %existing.id,
                "Participation renamed"
            );
            return Ok(existing.clone());
        }

        let record = ParticipantRecord {
            id: Uuid::new_v4(),
            meeting_code: meeting_code.to_string(),
            user_id,
            name: user_name.to_string(),
            role: Role::Member,
            simulated: false,
        };
        inner.participations.push(record.clone());

        debug!(
            target: "cc.store",
            meeting_code = %meeting_code,
            participation_id = %record.id,
            "Participation created"
        );
        Ok(record)
    }

    pub async fn update_role(
        &self,
        meeting_code: &str,
        participation_id: Uuid,
        role: Role,
    ) -> Result<ParticipantRecord, CcError> {
        let mut inner = self.inner.write().await;
        let record = inner.participation_mut(meeting_code, participation_id)?;
        record.role = role;
        Ok(record.clone())
    }

    pub async fn remove_participant(
        &self,
        meeting_code: &str,
        participation_id: Uuid,
    ) -> Result<ParticipantRecord, CcError> {
        let mut inner = self.inner.write().await;
        let index = inner
            .participations
            .iter()
            .position(|p| p.id == participation_id && p.meeting_code == meeting_code)
            .ok_or_else(|| CcError::ParticipantNotFound(participation_id.to_string()))?;
        Ok(inner.participations.remove(index))
    }

    /// Add a simulated member with a generated display name.
    ///
    /// Each simulated participant gets its own backing user.
    pub async fn add_simulated_participant(
        &self,
        meeting_code: &str,
    ) -> Result<ParticipantRecord, CcError> {
        let name = simulated_display_name();

        let mut inner = self.inner.write().await;
        inner.require_meeting(meeting_code)?;

        let user = User {
            id: Uuid::new_v4(),
            last_used_name: Some(name.clone()),
            created_at: Utc::now(),
        };
        let record = ParticipantRecord {
            id: Uuid::new_v4(),
            meeting_code: meeting_code.to_string(),
            user_id: user.id,
            name,
            role: Role::Member,
            simulated: true,
        };
        inner.users.insert(user.id, user);
        inner.participations.push(record.clone());

        debug!(
            target: "cc.store",
            meeting_code = %meeting_code,
            participation_id = %record.id,
            "Simulated participant created"
        );
        Ok(record)
    }
}

#[async_trait]
impl ParticipantStore for InMemoryStore {
    async fn resolve_participant(&self, id: Uuid) -> Result<Option<ParticipantRecord>, CcError> {
        Ok(self
            .inner
            .read()
            .await
            .participations
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn list_participants(
        &self,
        meeting_code: &str,
    ) -> Result<Vec<ParticipantRecord>, CcError> {
        Ok(self
            .inner
            .read()
            .await
            .participations
            .iter()
            .filter(|p| p.meeting_code == meeting_code)
            .cloned()
            .collect())
    }
}

/// Draw a short code not yet used by `meetings`.
fn unused_short_code(meetings: &HashMap<String, Meeting>) -> Result<String, CcError> {
    let rng = SystemRandom::new();
    for _ in 0..SHORT_CODE_ATTEMPTS {
        let code = generate_short_code(&rng)?;
        if !meetings.contains_key(&code) {
            return Ok(code);
        }
    }
    Err(CcError::Internal(
        "could not allocate an unused meeting short code".to_string(),
    ))
}

/// Six letters drawn uniformly from `[a-zA-Z]` using a CSPRNG.
fn generate_short_code(rng: &SystemRandom) -> Result<String, CcError> {
    // Largest multiple of the alphabet size that fits in a byte; bytes at or
    // above it are rejected so every letter stays equally likely.
    let limit = (256 / SHORT_CODE_ALPHABET.len() * SHORT_CODE_ALPHABET.len()) as u8;
    let mut code = String::with_capacity(SHORT_CODE_LENGTH);
    let mut buf = [0u8; 16];

    while code.len() < SHORT_CODE_LENGTH {
        rng.fill(&mut buf)
            .map_err(|_| CcError::Internal("system RNG failure".to_string()))?;
        for byte in buf.iter().copied().filter(|b| *b < limit) {
            if code.len() == SHORT_CODE_LENGTH {
                break;
            }
            let index = usize::from(byte) % SHORT_CODE_ALPHABET.len();
            if let Some(letter) = SHORT_CODE_ALPHABET.get(index) {
                code.push(char::from(*letter));
            }
        }
    }

    Ok(code)
}

fn simulated_display_name() -> String {
    let mut rng = rand::thread_rng();
    let first = SIMULATED_FIRST_NAMES.choose(&mut rng).unwrap_or(&"Sim");
    let last = SIMULATED_LAST_NAMES.choose(&mut rng).unwrap_or(&"Participant");
    format!("{first} {last}")
}
