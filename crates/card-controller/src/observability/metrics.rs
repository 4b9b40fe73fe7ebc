//! Prometheus metrics for the Card Controller.
//!
//! Naming follows Prometheus conventions: `cc_` prefix, `_total` suffix for
//! counters, `_seconds` suffix for duration histograms.
//!
//! # Cardinality
//!
//! - `outcome`: 4 values (see [`BroadcastOutcome`])
//! - `reason`: 4 values (see `EventError::metric_label`)
//! - `actor_type`: 3 values (registry, channel, simulation)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle that renders
/// `/metrics`.
///
/// Must be called before any metric is recorded.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Event handling is in-memory; anything above 100ms is a stall.
        .set_buckets_for_metric(
            Matcher::Prefix("cc_event_latency".to_string()),
            &[
                0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set event latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Result of a broadcast attempt on a meeting channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Snapshot sent to every connection.
    Sent,
    /// Snapshot identical to the last one sent; nothing went out.
    Deduplicated,
    /// Inside the cooldown window; folded into the pending broadcast.
    Coalesced,
    /// No connection to send to.
    SkippedIdle,
}

impl BroadcastOutcome {
    /// Label value for `cc_broadcasts_total`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BroadcastOutcome::Sent => "sent",
            BroadcastOutcome::Deduplicated => "deduplicated",
            BroadcastOutcome::Coalesced => "coalesced",
            BroadcastOutcome::SkippedIdle => "skipped_idle",
        }
    }
}

/// Set the number of live meeting channels.
///
/// Metric: `cc_channels_active`
pub fn set_channels_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_channels_active").set(count as f64);
}

/// Set the number of open WebSocket connections across all channels.
///
/// Metric: `cc_connections_active`
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("cc_connections_active").set(count as f64);
}

/// Record one broadcast attempt.
///
/// Metric: `cc_broadcasts_total`
/// Labels: `outcome`
pub fn record_broadcast(outcome: BroadcastOutcome) {
    counter!("cc_broadcasts_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a frame that could not be queued to a connection.
///
/// Metric: `cc_send_failures_total`
///
/// Each failure also drops the connection from its channel.
pub fn record_send_failure() {
    counter!("cc_send_failures_total").increment(1);
}

/// Record an inbound payload rejected with a policy-violation close.
///
/// Metric: `cc_events_rejected_total`
/// Labels: `reason`
pub fn record_event_rejected(reason: &'static str) {
    counter!("cc_events_rejected_total", "reason" => reason).increment(1);
}

/// Record one simulated participant sweep.
///
/// Metric: `cc_simulation_rounds_total`
pub fn record_simulation_round() {
    counter!("cc_simulation_rounds_total").increment(1);
}

/// Record an actor task that ended by panicking.
///
/// Metric: `cc_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: any non-zero value is a bug.
pub fn record_actor_panic(actor_type: &'static str) {
    counter!("cc_actor_panics_total", "actor_type" => actor_type).increment(1);
}

/// Record time from payload receipt to the event being folded into state.
///
/// Metric: `cc_event_latency_seconds`
pub fn record_event_latency(duration: Duration) {
    histogram!("cc_event_latency_seconds").record(duration.as_secs_f64());
}
