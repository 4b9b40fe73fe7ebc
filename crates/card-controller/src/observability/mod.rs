//! Observability for the Card Controller.
//!
//! Every metric carries the `cc_` prefix. Labels are bounded enums so the
//! series count stays flat regardless of how many meetings are live.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `cc_channels_active` | Gauge | none | Meeting channels held by the registry |
//! | `cc_connections_active` | Gauge | none | Open WebSocket connections |
//! | `cc_broadcasts_total` | Counter | `outcome` | Broadcast attempts by result |
//! | `cc_send_failures_total` | Counter | none | Frames that could not be queued |
//! | `cc_events_rejected_total` | Counter | `reason` | Inbound payloads closed with 1008 |
//! | `cc_simulation_rounds_total` | Counter | none | Simulated participant sweeps |
//! | `cc_actor_panics_total` | Counter | `actor_type` | Actor tasks that died |
//! | `cc_event_latency_seconds` | Histogram | none | Payload receipt to state applied |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{
    init_metrics_recorder, record_actor_panic, record_broadcast, record_event_latency,
    record_event_rejected, record_send_failure, record_simulation_round, set_channels_active,
    set_connections_active, BroadcastOutcome,
};
