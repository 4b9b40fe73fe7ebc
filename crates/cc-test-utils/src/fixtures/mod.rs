//! Pre-configured test data fixtures for CC testing.
//!
//! Provides builders for:
//! - Participant records with different roles
//! - Simulated participants
//! - Card change payloads as clients send them

use card_controller::cards::CardState;
use card_controller::store::{ParticipantRecord, Role};
use serde_json::{json, Value};
use uuid::Uuid;

/// Meeting code used when a test does not care which one.
pub const TEST_MEETING_CODE: &str = "TestMt";

/// Test participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    /// Participation ID.
    pub id: Uuid,
    /// Owning user ID.
    pub user_id: Uuid,
    /// Display name.
    pub name: String,
    pub role: Role,
    /// Whether the simulation driver plays this participant.
    pub simulated: bool,
}

impl TestParticipant {
    /// Create a member with the given name and random IDs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: name.into(),
            role: Role::Member,
            simulated: false,
        }
    }

    /// Create a host.
    #[must_use]
    pub fn host(name: impl Into<String>) -> Self {
        Self::new(name).with_role(Role::Host)
    }

    /// Create a simulated member.
    #[must_use]
    pub fn simulated(name: impl Into<String>) -> Self {
        let mut p = Self::new(name);
        p.simulated = true;
        p
    }

    #[must_use]
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set an explicit participation ID (for reproducible tests).
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Build the record as it belongs to `meeting_code`.
    #[must_use]
    pub fn build(&self, meeting_code: &str) -> ParticipantRecord {
        ParticipantRecord {
            id: self.id,
            meeting_code: meeting_code.to_string(),
            user_id: self.user_id,
            name: self.name.clone(),
            role: self.role,
            simulated: self.simulated,
        }
    }
}

/// Build a roster of members for `meeting_code`, in the given order.
#[must_use]
pub fn roster(meeting_code: &str, names: &[&str]) -> Vec<ParticipantRecord> {
    names
        .iter()
        .map(|name| TestParticipant::new(*name).build(meeting_code))
        .collect()
}

/// The payload a client sends to change `pid`'s card.
#[must_use]
pub fn card_change_payload(pid: Uuid, state: CardState) -> Value {
    json!({
        "event": "card_change",
        "pid": pid.to_string(),
        "state": state.as_str(),
    })
}
