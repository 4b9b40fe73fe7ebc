//! Card Controller (CC) Service Library
//!
//! This library provides the core functionality for the Card Controller, a
//! single-process server where meeting participants raise lightweight status
//! cards that every connected observer sees live:
//!
//! - Authoritative in-memory card state per meeting
//! - Ordered tracking of who currently has a question
//! - De-duplicated, rate-limited snapshot fan-out to WebSocket observers
//! - Synthetic ("simulated") participants for demos
//!
//! # Architecture
//!
//! The CC uses an actor model hierarchy:
//!
//! ```text
//! MeetingChannelRegistry (one per process, explicitly constructed)
//! └── supervises N MeetingChannel actors
//!     └── MeetingChannel (one per meeting short code)
//!         ├── owns MeetingState (card states + question order)
//!         ├── fans out snapshots to N ConnectionHandles
//!         └── owns an optional SimulationDriver task
//! ```
//!
//! Every mutation of a channel's state arrives as a message on that
//! channel's mailbox, so a channel never needs a lock.
//!
//! # Modules
//!
//! - [`actors`] - Channel, registry and simulation actors
//! - [`cards`] - Card states and inbound event parsing
//! - [`state`] - Event folding and snapshots
//! - [`store`] - Participant store seam and the in-memory store
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP and WebSocket mappings
//! - [`routes`], [`handlers`], [`middleware`] - REST API and the channel WebSocket
//! - [`observability`] - Prometheus metrics and health endpoints

pub mod actors;
pub mod cards;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod state;
pub mod store;
