//! HTTP and WebSocket handlers.

pub mod meetings;
pub mod users;
pub mod ws;
