//! `MeetingChannelRegistry` - the process-wide map from meeting code to
//! channel.
//!
//! The registry is an actor like the channels it supervises. Lookups are
//! serialized through its mailbox, which makes "create if absent"
//! atomic: two callers asking for the same meeting at once get the same
//! channel.
//!
//! Channels are never evicted automatically. A channel with no connections
//! stays until [`MeetingChannelRegistry::remove`] is called or the registry
//! shuts down.

use super::channel::{MeetingChannel, MeetingChannelHandle};
use super::messages::{RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::config::ChannelSettings;
use crate::errors::CcError;
use crate::store::ParticipantStore;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Mailbox size for the registry actor.
const REGISTRY_MAILBOX_BUFFER: usize = 1000;

/// How long a removed channel gets to stop before we stop waiting.
const CHANNEL_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the registry actor.
///
/// Cloning is cheap; every clone talks to the same registry.
#[derive(Debug, Clone)]
pub struct MeetingChannelRegistry {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl MeetingChannelRegistry {
    /// Spawn a registry whose channels use `settings`.
    #[must_use]
    pub fn new(
        instance_id: String,
        settings: ChannelSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_MAILBOX_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RegistryActor::new(
            instance_id,
            receiver,
            cancel_token.clone(),
            settings,
            metrics,
        );

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// The channel for `meeting_code`, created and seeded from `store` if
    /// absent.
    pub async fn get(
        &self,
        meeting_code: &str,
        store: Arc<dyn ParticipantStore>,
    ) -> Result<MeetingChannelHandle, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Get {
            meeting_code: meeting_code.to_string(),
            store,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))?
    }

    /// Evict and cancel the channel for `meeting_code`. Returns whether one
    /// was held.
    pub async fn remove(&self, meeting_code: &str) -> Result<bool, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Remove {
            meeting_code: meeting_code.to_string(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn contains(&self, meeting_code: &str) -> Result<bool, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Contains {
            meeting_code: meeting_code.to_string(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::GetStatus { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop every channel, waiting up to `deadline` for each.
    ///
    /// Returns once the registry actor has finished.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), CcError> {
        let (tx, rx) = oneshot::channel();
        self.send(RegistryMessage::Shutdown {
            deadline,
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the registry and all channels without waiting.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, message: RegistryMessage) -> Result<(), CcError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }
}

struct ManagedChannel {
    handle: MeetingChannelHandle,
    task_handle: JoinHandle<()>,
    created_at: DateTime<Utc>,
}

/// The registry actor.
pub struct RegistryActor {
    instance_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token; every channel gets a child.
    cancel_token: CancellationToken,
    settings: ChannelSettings,
    channels: HashMap<String, ManagedChannel>,
    accepting_new: bool,
    shutdown_deadline: Duration,
    shutdown_waiter: Option<oneshot::Sender<()>>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RegistryActor {
    fn new(
        instance_id: String,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        settings: ChannelSettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Registry, &instance_id);

        Self {
            instance_id,
            receiver,
            cancel_token,
            settings,
            channels: HashMap::new(),
            accepting_new: true,
            shutdown_deadline: Duration::from_secs(30),
            shutdown_waiter: None,
            metrics,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "cc.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.registry",
            instance_id = %self.instance_id,
            "MeetingChannelRegistry started"
        );

        loop {
            self.check_channel_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.registry",
                        instance_id = %self.instance_id,
                        "MeetingChannelRegistry received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
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
                                target: "cc.actor.registry",
                                instance_id = %self.instance_id,
                                "MeetingChannelRegistry mailbox closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        if let Some(waiter) = self.shutdown_waiter.take() {
            let _ = waiter.send(());
        }

        info!(
            target: "cc.actor.registry",
            instance_id = %self.instance_id,
            messages_processed = self.mailbox.messages_processed(),
            "MeetingChannelRegistry stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::Get {
                meeting_code,
                store,
                respond_to,
            } => {
                let result = self.get(meeting_code, store.as_ref()).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::Remove {
                meeting_code,
                respond_to,
            } => {
                let removed = self.remove(&meeting_code);
                let _ = respond_to.send(removed);
            }

            RegistryMessage::Contains {
                meeting_code,
                respond_to,
            } => {
                let _ = respond_to.send(self.channels.contains_key(&meeting_code));
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                info!(
                    target: "cc.actor.registry",
                    instance_id = %self.instance_id,
                    channel_count = self.channels.len(),
                    "Initiating graceful shutdown"
                );
                self.accepting_new = false;
                self.shutdown_deadline = deadline;
                self.shutdown_waiter = Some(respond_to);
                self.cancel_token.cancel();
            }
        }
    }

    async fn get(
        &mut self,
        meeting_code: String,
        store: &dyn ParticipantStore,
    ) -> Result<MeetingChannelHandle, CcError> {
        if let Some(managed) = self.channels.get(&meeting_code) {
            return Ok(managed.handle.clone());
        }

        if !self.accepting_new {
            return Err(CcError::Internal("registry is shutting down".to_string()));
        }

        let roster = store.list_participants(&meeting_code).await?;

        let (handle, task_handle) = MeetingChannel::spawn(
            meeting_code.clone(),
            roster,
            self.settings,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.channels.insert(
            meeting_code.clone(),
            ManagedChannel {
                handle: handle.clone(),
                task_handle,
                created_at: Utc::now(),
            },
        );
        self.metrics.channel_created();

        info!(
            target: "cc.actor.registry",
            instance_id = %self.instance_id,
            meeting_code = %meeting_code,
            total_channels = self.channels.len(),
            "Meeting channel created"
        );

        Ok(handle)
    }

    /// Evict a channel without blocking the mailbox on its teardown.
    fn remove(&mut self, meeting_code: &str) -> bool {
        let Some(managed) = self.channels.remove(meeting_code) else {
            return false;
        };

        managed.handle.cancel();
        self.metrics.channel_removed();

        let meeting_code_owned = meeting_code.to_string();
        let instance_id = self.instance_id.clone();
        let lifetime = Utc::now() - managed.created_at;
        tokio::spawn(async move {
            match tokio::time::timeout(CHANNEL_CLEANUP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "cc.actor.registry",
                        instance_id = %instance_id,
                        meeting_code = %meeting_code_owned,
                        "Meeting channel task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.registry",
                        instance_id = %instance_id,
                        meeting_code = %meeting_code_owned,
                        error = ?e,
                        "Meeting channel task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cc.actor.registry",
                        instance_id = %instance_id,
                        meeting_code = %meeting_code_owned,
                        "Meeting channel task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "cc.actor.registry",
            instance_id = %self.instance_id,
            meeting_code = %meeting_code,
            lifetime_secs = lifetime.num_seconds(),
            total_channels = self.channels.len(),
            "Meeting channel removed"
        );

        true
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            channel_count: self.channels.len(),
            connection_count: self.metrics.connection_count(),
            is_shutting_down: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.channels.values() {
            managed.handle.cancel();
        }

        for (meeting_code, managed) in self.channels.drain() {
            match tokio::time::timeout(self.shutdown_deadline, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "cc.actor.registry",
                        instance_id = %self.instance_id,
                        meeting_code = %meeting_code,
                        error = ?e,
                        "Meeting channel task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "cc.actor.registry",
                        instance_id = %self.instance_id,
                        meeting_code = %meeting_code,
                        "Meeting channel shutdown timed out"
                    );
                }
            }
            self.metrics.channel_removed();
        }

        info!(
            target: "cc.actor.registry",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop channels whose task has ended on its own.
    async fn check_channel_health(&mut self) {
        let finished: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(meeting_code, _)| meeting_code.clone())
            .collect();

        for meeting_code in finished {
            let Some(managed) = self.channels.remove(&meeting_code) else {
                continue;
            };
            self.metrics.channel_removed();

            match managed.task_handle.await {
                Ok(()) => {
                    warn!(
                        target: "cc.actor.registry",
                        instance_id = %self.instance_id,
                        meeting_code = %meeting_code,
                        "Meeting channel exited unexpectedly"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "cc.actor.registry",
                        instance_id = %self.instance_id,
                        meeting_code = %meeting_code,
                        error = ?join_error,
                        "Meeting channel panicked"
                    );
                    self.metrics.record_panic(ActorType::Channel);
                }
                Err(_) => {}
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::cards::{CardState, ChannelEvent};
    use crate::store::{InMemoryStore, ParticipantRecord};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FailingStore;

    #[async_trait]
    impl ParticipantStore for FailingStore {
        async fn resolve_participant(
            &self,
            _id: Uuid,
        ) -> Result<Option<ParticipantRecord>, CcError> {
            Err(CcError::Store("unavailable".to_string()))
        }

        async fn list_participants(
            &self,
            _meeting_code: &str,
        ) -> Result<Vec<ParticipantRecord>, CcError> {
            Err(CcError::Store("unavailable".to_string()))
        }
    }

    fn registry() -> MeetingChannelRegistry {
        MeetingChannelRegistry::new(
            "cc-test".to_string(),
            ChannelSettings::default(),
            ActorMetrics::new(),
        )
    }

    async fn store_with_meeting() -> (Arc<InMemoryStore>, String, ParticipantRecord) {
        let store = InMemoryStore::new();
        let user = store.create_user().await.unwrap();
        let (meeting, host) = store
            .create_meeting(user.id, "Standup", "Alice", false)
            .await
            .unwrap();
        (Arc::new(store), meeting.short_code, host)
    }

    #[tokio::test]
    async fn test_get_twice_returns_same_channel() {
        let registry = registry();
        let (store, code, _) = store_with_meeting().await;

        let first = registry.get(&code, store.clone()).await.unwrap();
        let second = registry.get(&code, store).await.unwrap();

        assert!(first.same_channel(&second));
        assert_eq!(registry.get_status().await.unwrap().channel_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_access_creates_one_channel() {
        let registry = registry();
        let (store, code, _) = store_with_meeting().await;

        let (a, b) = tokio::join!(
            registry.get(&code, store.clone()),
            registry.get(&code, store.clone())
        );

        assert!(a.unwrap().same_channel(&b.unwrap()));
        assert_eq!(registry.get_status().await.unwrap().channel_count, 1);
    }

    #[tokio::test]
    async fn test_get_seeds_channel_from_store() {
        let registry = registry();
        let (store, code, host) = store_with_meeting().await;

        let channel = registry.get(&code, store).await.unwrap();
        let snapshot = channel.get_snapshot().await.unwrap();

        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].id, host.id);
        assert_eq!(channel.meeting_code(), code);
    }

    #[tokio::test]
    async fn test_remove_then_get_returns_fresh_channel() {
        let registry = registry();
        let (store, code, host) = store_with_meeting().await;

        let old = registry.get(&code, store.clone()).await.unwrap();
        old.handle_event(ChannelEvent::CardChange {
            participation: host.clone(),
            new_state: CardState::Warm,
        })
        .await
        .unwrap();

        assert!(registry.remove(&code).await.unwrap());
        assert!(!registry.contains(&code).await.unwrap());
        assert!(old.is_cancelled());

        let fresh = registry.get(&code, store).await.unwrap();
        assert!(!fresh.same_channel(&old));
        let snapshot = fresh.get_snapshot().await.unwrap();
        assert_eq!(snapshot.participants[0].card_state, CardState::None);
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = registry();
        assert!(!registry.remove("ZzZzZz").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_creates_nothing() {
        let registry = registry();

        let result = registry.get("AbCdEf", Arc::new(FailingStore)).await;

        assert!(matches!(result, Err(CcError::Store(_))));
        assert!(!registry.contains("AbCdEf").await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_cancels_channels() {
        let registry = registry();
        let (store, code, _) = store_with_meeting().await;
        let channel = registry.get(&code, store.clone()).await.unwrap();

        registry.shutdown(Duration::from_secs(5)).await.unwrap();

        assert!(registry.is_cancelled());
        assert!(channel.is_cancelled());
        assert!(registry.get(&code, store).await.is_err());
    }
}
