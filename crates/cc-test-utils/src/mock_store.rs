//! Scriptable participant store for CC channel testing.
//!
//! Rosters are edited directly by the test; the channel only sees them
//! through [`ParticipantStore`]. Every call is counted and lookups can be
//! made to fail.
//!
//! # Example
//!
//! ```rust,ignore
//! use cc_test_utils::{MockStore, TestParticipant};
//!
//! let alice = TestParticipant::new("alice").build("AbCdEf");
//! let store = MockStore::new().with_participant(alice.clone());
//!
//! store.fail_lists(true);
//! assert!(store.list_participants("AbCdEf").await.is_err());
//! assert_eq!(store.list_calls(), 1);
//! ```

use async_trait::async_trait;
use card_controller::errors::CcError;
use card_controller::store::{ParticipantRecord, ParticipantStore, Role};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Mock participant store.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    /// Every participation, in insertion order.
    participants: Vec<ParticipantRecord>,
    fail_lists: bool,
    fail_resolves: bool,
    list_calls: usize,
    resolve_calls: usize,
}

impl MockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participation (builder form).
    #[must_use]
    pub fn with_participant(self, record: ParticipantRecord) -> Self {
        self.add_participant(record);
        self
    }

    /// Add a participation.
    pub fn add_participant(&self, record: ParticipantRecord) {
        self.inner.lock().unwrap().participants.push(record);
    }

    /// Remove a participation. Returns whether it was present.
    pub fn remove_participant(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.participants.len();
        inner.participants.retain(|p| p.id != id);
        inner.participants.len() != before
    }

    /// Change a participation's display name.
    pub fn rename_participant(&self, id: Uuid, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.participants.iter_mut().find(|p| p.id == id) {
            record.name = name.to_string();
        }
    }

    /// Change a participation's role.
    pub fn set_role(&self, id: Uuid, role: Role) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.participants.iter_mut().find(|p| p.id == id) {
            record.role = role;
        }
    }

    /// Make `list_participants` fail until reset.
    pub fn fail_lists(&self, fail: bool) {
        self.inner.lock().unwrap().fail_lists = fail;
    }

    /// Make `resolve_participant` fail until reset.
    pub fn fail_resolves(&self, fail: bool) {
        self.inner.lock().unwrap().fail_resolves = fail;
    }

    /// Number of `list_participants` calls so far.
    pub fn list_calls(&self) -> usize {
        self.inner.lock().unwrap().list_calls
    }

    /// Number of `resolve_participant` calls so far.
    pub fn resolve_calls(&self) -> usize {
        self.inner.lock().unwrap().resolve_calls
    }

    /// Share this store behind the trait object the channel API takes.
    #[must_use]
    pub fn as_store(&self) -> Arc<dyn ParticipantStore> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl ParticipantStore for MockStore {
    async fn resolve_participant(&self, id: Uuid) -> Result<Option<ParticipantRecord>, CcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.resolve_calls += 1;
        if inner.fail_resolves {
            return Err(CcError::Store("mock resolve failure".to_string()));
        }
        Ok(inner.participants.iter().find(|p| p.id == id).cloned())
    }

    async fn list_participants(
        &self,
        meeting_code: &str,
    ) -> Result<Vec<ParticipantRecord>, CcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.list_calls += 1;
        if inner.fail_lists {
            return Err(CcError::Store("mock list failure".to_string()));
        }
        Ok(inner
            .participants
            .iter()
            .filter(|p| p.meeting_code == meeting_code)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{TestParticipant, TEST_MEETING_CODE};

    #[tokio::test]
    async fn test_list_filters_by_meeting() {
        let alice = TestParticipant::new("alice").build(TEST_MEETING_CODE);
        let other = TestParticipant::new("bob").build("Other1");
        let store = MockStore::new()
            .with_participant(alice.clone())
            .with_participant(other);

        let roster = store.list_participants(TEST_MEETING_CODE).await.unwrap();
        assert_eq!(roster, vec![alice]);
        assert_eq!(store.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MockStore::new();
        store.fail_lists(true);
        store.fail_resolves(true);

        assert!(store.list_participants(TEST_MEETING_CODE).await.is_err());
        assert!(store.resolve_participant(Uuid::new_v4()).await.is_err());
        assert_eq!(store.resolve_calls(), 1);

        store.fail_lists(false);
        assert!(store.list_participants(TEST_MEETING_CODE).await.is_ok());
    }

    #[tokio::test]
    async fn test_edits_are_visible() {
        let alice = TestParticipant::new("alice").build(TEST_MEETING_CODE);
        let store = MockStore::new().with_participant(alice.clone());

        store.rename_participant(alice.id, "Alicia");
        store.set_role(alice.id, Role::Host);
        let record = store.resolve_participant(alice.id).await.unwrap().unwrap();
        assert_eq!(record.name, "Alicia");
        assert_eq!(record.role, Role::Host);

        assert!(store.remove_participant(alice.id));
        assert!(!store.remove_participant(alice.id));
    }
}
