//! HTTP routes for the Card Controller.
//!
//! Defines the Axum router and application state.

use crate::actors::MeetingChannelRegistry;
use crate::config::Config;
use crate::handlers::{meetings, users, ws};
use crate::middleware::require_auth;
use crate::store::{InMemoryStore, ParticipantStore};
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Users, meetings and participations.
    pub store: InMemoryStore,

    /// Live meeting channels.
    pub registry: MeetingChannelRegistry,

    /// Service configuration.
    pub config: Config,
}

impl AppState {
    /// The store as the roster seam channels read from.
    #[must_use]
    pub fn participant_store(&self) -> Arc<dyn ParticipantStore> {
        Arc::new(self.store.clone())
    }
}

/// Build the API router.
///
/// - `POST /api/me` - create an anonymous user (public)
/// - `GET /api/meetings/:code/ws` - meeting channel WebSocket (public)
/// - everything else under `/api` requires `Authorization: Bearer <user id>`
///
/// Timeouts do not apply to upgraded WebSocket connections; the layer only
/// bounds the HTTP exchange up to the upgrade response.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/api/me", post(users::create_user))
        .route("/api/meetings/:code/ws", get(ws::meeting_websocket))
        .with_state(Arc::clone(&state));

    let protected_routes = Router::new()
        .route("/api/me", get(users::get_me))
        .route("/api/meetings", post(meetings::create_meeting))
        .route("/api/meetings/:code", get(meetings::get_meeting))
        .route(
            "/api/meetings/:code/participants",
            post(meetings::join_meeting),
        )
        .route(
            "/api/meetings/:code/participants/:pid",
            patch(meetings::update_participant_role).delete(meetings::remove_participant),
        )
        .route(
            "/api/meetings/:code/simulated_participants",
            post(meetings::create_simulated_participant),
        )
        .route("/api/meetings/:code/channel", delete(meetings::flush_channel))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_auth,
        ))
        .with_state(state);

    public_routes
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}
