//! `MeetingChannel` - live state and fan-out for one meeting.
//!
//! Each channel is an actor task that exclusively owns:
//!
//! - the meeting's [`MeetingState`]
//! - the outbound handles of every connected observer
//! - broadcast bookkeeping (last send time, last snapshot digest, the
//!   deadline of a coalesced broadcast)
//! - the simulation driver, when one is running
//!
//! # Broadcast gating
//!
//! State changes call [`MeetingChannel::broadcast_with_cooldown`]. The first
//! change after a quiet period goes out at once; further changes inside the
//! cooldown window collapse into a single trailing broadcast at
//! `last_sent_at + cooldown`. A broadcast whose serialized snapshot hashes
//! the same as the last one sent is skipped.
//!
//! The trailing broadcast is a deadline polled by the actor loop rather than
//! a separate task, so cancelling the channel also discards it.

use super::connection::{ConnectionHandle, ConnectionId};
use super::messages::{ChannelMessage, ChannelStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::simulation::SimulationDriver;
use crate::cards::{CardState, ChannelEvent};
use crate::config::ChannelSettings;
use crate::errors::CcError;
use crate::observability::metrics::{self as prom, BroadcastOutcome};
use crate::state::{MeetingState, Snapshot};
use crate::store::{ParticipantRecord, ParticipantStore};

use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Mailbox size for a channel actor.
const CHANNEL_MAILBOX_BUFFER: usize = 256;

/// Handle to a `MeetingChannel`.
#[derive(Debug, Clone)]
pub struct MeetingChannelHandle {
    sender: mpsc::Sender<ChannelMessage>,
    cancel_token: CancellationToken,
    meeting_code: String,
}

impl MeetingChannelHandle {
    #[must_use]
    pub fn meeting_code(&self) -> &str {
        &self.meeting_code
    }

    /// Start sending snapshots to `connection`.
    ///
    /// May start the simulation driver.
    pub async fn add_connection(&self, connection: ConnectionHandle) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::AddConnection {
            connection,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop sending to a connection. Returns whether it was attached.
    ///
    /// Removing the last connection always stops the simulation driver.
    pub async fn remove_connection(&self, connection_id: ConnectionId) -> Result<bool, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::RemoveConnection {
            connection_id,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Send the current snapshot to one connection right now.
    pub async fn send_snapshot(&self, connection: ConnectionHandle) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::SendSnapshot {
            connection,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Fold a validated event and schedule a broadcast.
    pub async fn handle_event(&self, event: ChannelEvent) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::HandleEvent {
            event,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Reload the roster from `store`, then broadcast and re-evaluate the
    /// simulation.
    ///
    /// The store is read inside the actor, so concurrent refreshes apply in
    /// mailbox order.
    pub async fn refresh_participants(
        &self,
        store: Arc<dyn ParticipantStore>,
    ) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::RefreshParticipants {
            store,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    pub async fn get_snapshot(&self) -> Result<Snapshot, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::GetSnapshot { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<ChannelStatus, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the channel actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// True if both handles address the same actor instance.
    #[must_use]
    pub fn same_channel(&self, other: &MeetingChannelHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    async fn send(&self, message: ChannelMessage) -> Result<(), CcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }
}

/// The `MeetingChannel` actor.
pub struct MeetingChannel {
    meeting_code: String,
    receiver: mpsc::Receiver<ChannelMessage>,
    /// Given to simulation drivers; weak so the actor can still observe its
    /// mailbox closing.
    self_sender: mpsc::WeakSender<ChannelMessage>,
    cancel_token: CancellationToken,
    settings: ChannelSettings,
    state: MeetingState,
    connections: Vec<ConnectionHandle>,
    /// `None` until the first real broadcast.
    last_sent_at: Option<Instant>,
    last_sent_hash: Option<Vec<u8>>,
    /// When the coalesced broadcast is due.
    pending_broadcast: Option<Instant>,
    broadcasts_sent: u64,
    simulation: Option<SimulationDriver>,
    simulation_generation: u64,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl MeetingChannel {
    /// Spawn a channel seeded with `roster`.
    #[must_use]
    pub fn spawn(
        meeting_code: String,
        roster: Vec<ParticipantRecord>,
        settings: ChannelSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (MeetingChannelHandle, JoinHandle<()>) {
        let (actor, handle) = Self::new(meeting_code, roster, settings, cancel_token, metrics);
        let task_handle = tokio::spawn(actor.run());

        (handle, task_handle)
    }

    fn new(
        meeting_code: String,
        roster: Vec<ParticipantRecord>,
        settings: ChannelSettings,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (Self, MeetingChannelHandle) {
        let (sender, receiver) = mpsc::channel(CHANNEL_MAILBOX_BUFFER);

        let actor = Self {
            meeting_code: meeting_code.clone(),
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            settings,
            state: MeetingState::new(roster),
            connections: Vec::new(),
            last_sent_at: None,
            last_sent_hash: None,
            pending_broadcast: None,
            broadcasts_sent: 0,
            simulation: None,
            simulation_generation: 0,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Channel, &meeting_code),
        };

        let handle = MeetingChannelHandle {
            sender,
            cancel_token,
            meeting_code,
        };

        (actor, handle)
    }

    #[instrument(skip_all, name = "cc.actor.channel", fields(meeting_code = %self.meeting_code))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            participants = self.state.participant_count(),
            "MeetingChannel started"
        );

        loop {
            self.check_simulation_health().await;

            let pending = self.pending_broadcast;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "cc.actor.channel",
                        meeting_code = %self.meeting_code,
                        "MeetingChannel received cancellation signal"
                    );
                    break;
                }

                () = tokio::time::sleep_until(pending.unwrap_or_else(Instant::now)), if pending.is_some() => {
                    self.pending_broadcast = None;
                    self.broadcast_if_changed();
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "cc.actor.channel",
                                meeting_code = %self.meeting_code,
                                "MeetingChannel mailbox closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.stop_simulation();
        let dropped = self.connections.len();
        self.connections.clear();
        self.metrics.connections_removed(dropped);

        info!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            connections_dropped = dropped,
            broadcasts_sent = self.broadcasts_sent,
            messages_processed = self.mailbox.messages_processed(),
            "MeetingChannel stopped"
        );
    }

    async fn handle_message(&mut self, message: ChannelMessage) {
        match message {
            ChannelMessage::AddConnection {
                connection,
                respond_to,
            } => {
                self.add_connection(connection);
                let _ = respond_to.send(());
            }

            ChannelMessage::RemoveConnection {
                connection_id,
                respond_to,
            } => {
                let removed = self.remove_connection(connection_id);
                let _ = respond_to.send(removed);
            }

            ChannelMessage::SendSnapshot {
                connection,
                respond_to,
            } => {
                let result = self.send_snapshot(&connection);
                let _ = respond_to.send(result);
            }

            ChannelMessage::HandleEvent { event, respond_to } => {
                self.state.apply_event(&event);
                self.broadcast_with_cooldown();
                let _ = respond_to.send(());
            }

            ChannelMessage::RefreshParticipants { store, respond_to } => {
                let result = self.refresh_participants(store.as_ref()).await;
                let _ = respond_to.send(result);
            }

            ChannelMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.state.snapshot());
            }

            ChannelMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            ChannelMessage::SimulationTick { generation } => {
                self.simulation_tick(generation);
            }
        }
    }

    fn add_connection(&mut self, connection: ConnectionHandle) {
        debug!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            connection_id = %connection.id(),
            "Connection attached"
        );
        self.connections.push(connection);
        self.metrics.connection_added();
        self.maybe_start_or_stop_simulation();
    }

    fn remove_connection(&mut self, connection_id: ConnectionId) -> bool {
        let Some(index) = self
            .connections
            .iter()
            .position(|c| c.id() == connection_id)
        else {
            return false;
        };

        self.connections.remove(index);
        self.metrics.connections_removed(1);

        debug!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            connection_id = %connection_id,
            remaining = self.connections.len(),
            "Connection detached"
        );

        // Nobody is watching: stop regardless of the roster.
        if self.connections.is_empty() {
            self.stop_simulation();
        }

        true
    }

    fn send_snapshot(&mut self, connection: &ConnectionHandle) -> Result<(), CcError> {
        let json = self.state.snapshot().to_json()?;

        if let Err(failure) = connection.try_send(Arc::from(json)) {
            prom::record_send_failure();
            self.remove_connection(connection.id());
            return Err(CcError::Internal(format!(
                "snapshot send failed: {}",
                failure.as_str()
            )));
        }

        Ok(())
    }

    async fn refresh_participants(&mut self, store: &dyn ParticipantStore) -> Result<(), CcError> {
        let roster = store.list_participants(&self.meeting_code).await?;

        debug!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            participants = roster.len(),
            "Roster refreshed"
        );

        self.state.set_participants(roster);
        self.broadcast_with_cooldown();
        self.maybe_start_or_stop_simulation();
        Ok(())
    }

    /// Broadcast now if the cooldown has elapsed, otherwise make sure one
    /// trailing broadcast is scheduled for when it does.
    fn broadcast_with_cooldown(&mut self) {
        let now = Instant::now();

        match self.last_sent_at {
            Some(last) if now <= last + self.settings.broadcast_cooldown => {
                if self.pending_broadcast.is_none() {
                    self.pending_broadcast = Some(last + self.settings.broadcast_cooldown);
                }
                prom::record_broadcast(BroadcastOutcome::Coalesced);
            }
            _ => self.broadcast_if_changed(),
        }
    }

    /// Send the current snapshot to every connection unless it matches the
    /// last one sent.
    fn broadcast_if_changed(&mut self) {
        if self.connections.is_empty() {
            prom::record_broadcast(BroadcastOutcome::SkippedIdle);
            return;
        }

        let json = match self.state.snapshot().to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(
                    target: "cc.actor.channel",
                    meeting_code = %self.meeting_code,
                    error = %e,
                    "Snapshot serialization failed, broadcast skipped"
                );
                return;
            }
        };

        let hash = Snapshot::digest(&json);
        if self.last_sent_hash.as_deref() == Some(hash.as_slice()) {
            prom::record_broadcast(BroadcastOutcome::Deduplicated);
            return;
        }

        let frame: Arc<str> = Arc::from(json);
        let mut failed = Vec::new();
        for connection in &self.connections {
            if let Err(failure) = connection.try_send(Arc::clone(&frame)) {
                warn!(
                    target: "cc.actor.channel",
                    meeting_code = %self.meeting_code,
                    connection_id = %connection.id(),
                    reason = failure.as_str(),
                    "Snapshot send failed, dropping connection"
                );
                prom::record_send_failure();
                failed.push(connection.id());
            }
        }

        for connection_id in failed {
            self.remove_connection(connection_id);
        }

        self.last_sent_hash = Some(hash);
        self.last_sent_at = Some(Instant::now());
        self.broadcasts_sent += 1;
        prom::record_broadcast(BroadcastOutcome::Sent);

        debug!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            recipients = self.connections.len(),
            "Snapshot broadcast"
        );
    }

    /// One sweep: every simulated participant draws a random card.
    fn simulation_tick(&mut self, generation: u64) {
        let current = self.simulation.as_ref().map(SimulationDriver::generation);
        if current != Some(generation) {
            return;
        }

        let simulated = self.state.simulated_participants();
        {
            let mut rng = rand::thread_rng();
            for participation in simulated {
                let new_state = CardState::ALL
                    .choose(&mut rng)
                    .copied()
                    .unwrap_or_default();
                self.state.apply_event(&ChannelEvent::CardChange {
                    participation,
                    new_state,
                });
            }
        }

        prom::record_simulation_round();
        self.broadcast_with_cooldown();
    }

    fn maybe_start_or_stop_simulation(&mut self) {
        let wanted = !self.connections.is_empty() && self.state.has_simulated_participants();

        match (wanted, self.simulation.is_some()) {
            (true, false) => self.start_simulation(),
            (false, true) => self.stop_simulation(),
            _ => {}
        }
    }

    fn start_simulation(&mut self) {
        self.simulation_generation += 1;
        self.simulation = Some(SimulationDriver::spawn(
            self.meeting_code.clone(),
            self.simulation_generation,
            self.settings.simulation_interval,
            self.self_sender.clone(),
            self.cancel_token.child_token(),
        ));

        info!(
            target: "cc.actor.channel",
            meeting_code = %self.meeting_code,
            generation = self.simulation_generation,
            "Simulation started"
        );
    }

    fn stop_simulation(&mut self) {
        if let Some(driver) = self.simulation.take() {
            let generation = driver.generation();
            driver.stop();
            info!(
                target: "cc.actor.channel",
                meeting_code = %self.meeting_code,
                generation,
                "Simulation stopped"
            );
        }
    }

    /// Restart a driver that ended on its own.
    async fn check_simulation_health(&mut self) {
        if !self
            .simulation
            .as_ref()
            .is_some_and(SimulationDriver::is_finished)
        {
            return;
        }

        if let Some(driver) = self.simulation.take() {
            match driver.join().await {
                Ok(()) => {
                    warn!(
                        target: "cc.actor.channel",
                        meeting_code = %self.meeting_code,
                        "Simulation driver exited unexpectedly"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    self.metrics.record_panic(ActorType::Simulation);
                }
                Err(join_error) => {
                    warn!(
                        target: "cc.actor.channel",
                        meeting_code = %self.meeting_code,
                        error = %join_error,
                        "Simulation driver was cancelled externally"
                    );
                }
            }
        }

        self.maybe_start_or_stop_simulation();
    }

    fn get_status(&self) -> ChannelStatus {
        ChannelStatus {
            meeting_code: self.meeting_code.clone(),
            connection_count: self.connections.len(),
            participant_count: self.state.participant_count(),
            question_count: self.state.questions().len(),
            simulation_running: self.simulation.is_some(),
            simulation_generation: self.simulation_generation,
            broadcast_pending: self.pending_broadcast.is_some(),
            broadcasts_sent: self.broadcasts_sent,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }
}
