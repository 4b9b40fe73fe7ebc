//! Mailbox monitoring and shared actor counters.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Registry   | < 100  | 100-500 | > 500    |
//! | Channel    | < 100  | 100-500 | > 500    |
//!
//! The simulation driver has no mailbox; it only shows up in panic counts.

use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth thresholds for registry and channel actors.
pub const MAILBOX_NORMAL: usize = 100;
pub const MAILBOX_WARNING: usize = 500;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `MeetingChannelRegistry` (one per process).
    Registry,
    /// `MeetingChannel` (one per meeting with live interest).
    Channel,
    /// Simulation driver task (at most one per channel).
    Simulation,
}

impl ActorType {
    /// Label value for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Channel => "channel",
            ActorType::Simulation => "simulation",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        MAILBOX_WARNING
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        MAILBOX_NORMAL
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks queue depth of one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Meeting code, or the instance id for the registry.
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message taken off the mailbox, with `remaining` still queued
    /// behind it.
    ///
    /// Depth is sampled from the receiver at each dequeue, so it counts every
    /// sender including the weak one held by simulation drivers.
    pub fn record_dequeue(&self, remaining: usize) {
        let previous = self.depth.swap(remaining, Ordering::Relaxed);
        self.peak_depth.fetch_max(remaining, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);

        let level = self.level_for_depth(remaining);
        if level == self.level_for_depth(previous) {
            return;
        }

        match level {
            MailboxLevel::Critical => {
                warn!(
                    target: "cc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = remaining,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning => {
                debug!(
                    target: "cc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = remaining,
                    "Mailbox depth elevated"
                );
            }
            MailboxLevel::Normal => {
                debug!(
                    target: "cc.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = remaining,
                    "Mailbox depth back to normal"
                );
            }
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Counters shared by every actor in the process.
///
/// Gauge updates are mirrored to Prometheus as they happen so `/metrics`
/// never needs to ask an actor.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    pub active_channels: AtomicUsize,
    pub active_connections: AtomicUsize,
    /// Actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn channel_created(&self) {
        let count = self.active_channels.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_channels_active(count);
    }

    pub fn channel_removed(&self) {
        let count = self
            .active_channels
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        prom::set_channels_active(count);
    }

    pub fn connection_added(&self) {
        let count = self.active_connections.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_connections_active(count);
    }

    /// Forget `n` connections at once (send failures, channel teardown).
    pub fn connections_removed(&self, n: usize) {
        if n == 0 {
            return;
        }
        let count = self
            .active_connections
            .fetch_sub(n, Ordering::Relaxed)
            .saturating_sub(n);
        prom::set_connections_active(count);
    }

    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "cc.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.active_channels.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_as_str() {
        assert_eq!(ActorType::Registry.as_str(), "registry");
        assert_eq!(ActorType::Channel.as_str(), "channel");
        assert_eq!(ActorType::Simulation.as_str(), "simulation");
    }

    #[test]
    fn test_mailbox_monitor_tracks_sampled_depth() {
        let monitor = MailboxMonitor::new(ActorType::Channel, "AbCdEf");

        monitor.record_dequeue(3);
        monitor.record_dequeue(7);
        assert_eq!(monitor.current_depth(), 7);
        assert_eq!(monitor.peak_depth(), 7);

        monitor.record_dequeue(0);
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.peak_depth(), 7);
        assert_eq!(monitor.messages_processed(), 3);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new(ActorType::Registry, "cc-test");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_dequeue(150);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.record_dequeue(550);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.record_dequeue(10);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_actor_metrics_counts() {
        let metrics = ActorMetrics::new();

        metrics.channel_created();
        metrics.channel_created();
        metrics.connection_added();
        metrics.connection_added();
        metrics.connection_added();
        assert_eq!(metrics.channel_count(), 2);
        assert_eq!(metrics.connection_count(), 3);

        metrics.channel_removed();
        metrics.connections_removed(2);
        assert_eq!(metrics.channel_count(), 1);
        assert_eq!(metrics.connection_count(), 1);

        metrics.connections_removed(0);
        assert_eq!(metrics.connection_count(), 1);
    }

    #[test]
    fn test_actor_metrics_panics() {
        let metrics = ActorMetrics::new();

        metrics.record_panic(ActorType::Channel);
        metrics.record_panic(ActorType::Simulation);
        assert_eq!(metrics.panic_count(), 2);
    }
}
