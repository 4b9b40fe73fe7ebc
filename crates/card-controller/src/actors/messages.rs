//! Message types for actor communication.
//!
//! Request/reply pairs carry a `oneshot` sender; fire-and-forget messages do
//! not.

use super::channel::MeetingChannelHandle;
use super::connection::{ConnectionHandle, ConnectionId};
use crate::cards::ChannelEvent;
use crate::errors::CcError;
use crate::state::Snapshot;
use crate::store::ParticipantStore;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to a `MeetingChannel`.
pub enum ChannelMessage {
    /// Start fanning snapshots out to a new connection.
    AddConnection {
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<()>,
    },

    /// Stop sending to a connection. Replies whether it was present.
    RemoveConnection {
        connection_id: ConnectionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Send the current snapshot to one connection, bypassing the
    /// cooldown and de-duplication gates.
    SendSnapshot {
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// Fold a validated client event into state.
    HandleEvent {
        event: ChannelEvent,
        respond_to: oneshot::Sender<()>,
    },

    /// Reload the roster from the store and fold it in.
    RefreshParticipants {
        store: Arc<dyn ParticipantStore>,
        respond_to: oneshot::Sender<Result<(), CcError>>,
    },

    /// Current snapshot, for inspection.
    GetSnapshot {
        respond_to: oneshot::Sender<Snapshot>,
    },

    GetStatus {
        respond_to: oneshot::Sender<ChannelStatus>,
    },

    /// One sweep of the simulation driver. Ticks from a stopped driver
    /// carry a stale generation and are ignored.
    SimulationTick { generation: u64 },
}

/// Point-in-time view of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub meeting_code: String,
    pub connection_count: usize,
    pub participant_count: usize,
    pub question_count: usize,
    pub simulation_running: bool,
    /// Bumped every time a simulation driver starts, restarts included.
    pub simulation_generation: u64,
    /// A coalesced broadcast is waiting for the cooldown to elapse.
    pub broadcast_pending: bool,
    /// Snapshots actually sent (not counting direct `SendSnapshot`).
    pub broadcasts_sent: u64,
    pub mailbox_depth: usize,
}

/// Messages sent to the `MeetingChannelRegistry`.
pub enum RegistryMessage {
    /// Return the channel for `meeting_code`, creating and loading it if
    /// absent.
    Get {
        meeting_code: String,
        store: Arc<dyn ParticipantStore>,
        respond_to: oneshot::Sender<Result<MeetingChannelHandle, CcError>>,
    },

    /// Evict the channel for `meeting_code`. Replies whether one existed.
    Remove {
        meeting_code: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Whether a channel is currently held for `meeting_code`.
    Contains {
        meeting_code: String,
        respond_to: oneshot::Sender<bool>,
    },

    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Cancel every channel and wait for them to stop.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<()>,
    },
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStatus {
    pub channel_count: usize,
    pub connection_count: usize,
    pub is_shutting_down: bool,
    pub mailbox_depth: usize,
}
