//! Bearer authentication for protected routes.
//!
//! The bearer token is the caller's user id. The middleware resolves it to
//! a [`User`] and stores it in request extensions for handlers to extract
//! with `Extension<User>`.

use crate::errors::CcError;
use crate::routes::AppState;
use crate::store::User;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Reject the request with 401 unless it carries a known user's id.
///
/// ```text
/// Authorization: Bearer <user uuid>
/// ```
#[instrument(skip_all, name = "cc.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, CcError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "cc.middleware.auth", "Missing Authorization header");
            CcError::InvalidToken("Missing Authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "cc.middleware.auth", "Invalid Authorization header format");
        CcError::InvalidToken("Invalid authorization header".to_string())
    })?;

    let user_id = Uuid::parse_str(token.trim())
        .map_err(|_| CcError::InvalidToken("Invalid authorization header".to_string()))?;

    let user = state
        .store
        .get_user(user_id)
        .await?
        .ok_or_else(|| CcError::InvalidToken("Unknown user".to_string()))?;

    req.extensions_mut().insert::<User>(user);

    Ok(next.run(req).await)
}
