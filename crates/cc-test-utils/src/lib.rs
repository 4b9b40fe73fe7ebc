//! # CC Test Utilities
//!
//! Shared test utilities for the Card Controller (CC).
//!
//! ## Modules
//!
//! - `fixtures` - Participant and roster builders
//! - `mock_store` - Scriptable `ParticipantStore` with call counting and
//!   failure injection
//! - `probe` - Connection probe that decodes the snapshots a channel sends
//! - `server_harness` - Real CC server on a random port for E2E tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let alice = TestParticipant::new("alice").build("AbCdEf");
//!     let store = MockStore::new().with_participant(alice.clone());
//!
//!     let (connection, mut probe) = ConnectionProbe::new(8);
//!     // attach `connection` to a channel, then:
//!     let snapshot = probe.next_snapshot().await;
//!     assert_eq!(snapshot.participants.len(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_store;
pub mod probe;
pub mod server_harness;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_store::*;
pub use probe::*;
pub use server_harness::*;
