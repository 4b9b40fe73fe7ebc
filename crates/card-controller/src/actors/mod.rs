//! Actor model for the Card Controller.
//!
//! ```text
//! MeetingChannelRegistry (one per process)
//! └── supervises N MeetingChannels
//!     └── MeetingChannel (one per meeting code)
//!         ├── owns MeetingState and broadcast bookkeeping
//!         ├── fans out to N ConnectionHandles
//!         └── owns at most one SimulationDriver
//! ```
//!
//! - **CancellationToken propagation**: the registry owns the root token;
//!   channels and simulation drivers get child tokens
//! - **Mailbox monitoring**: depth thresholds with warnings (100/500)
//! - **Message passing**: all mutation goes through `tokio::sync::mpsc`
//!   mailboxes, so channel state needs no lock
//!
//! # Modules
//!
//! - [`registry`] - meeting code to channel map
//! - [`channel`] - per-meeting state, broadcast gating and simulation control
//! - [`connection`] - outbound queue of one observer
//! - [`simulation`] - periodic tick source for simulated participants
//! - [`messages`] - message types for actor communication
//! - [`metrics`] - mailbox monitoring and shared counters

pub mod channel;
pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod simulation;

pub use channel::{MeetingChannel, MeetingChannelHandle};
pub use connection::{ConnectionHandle, ConnectionId, SendFailure};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::{MeetingChannelRegistry, RegistryActor};
pub use simulation::SimulationDriver;
