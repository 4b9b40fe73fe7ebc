//! Anonymous user identity.

use crate::errors::CcError;
use crate::routes::AppState;
use crate::store::User;
use axum::{extract::State, Extension, Json};
use std::sync::Arc;
use tracing::instrument;

/// `POST /api/me` - create a user. The returned `id` is the bearer token
/// for every later call.
#[instrument(skip_all, name = "cc.handlers.users.create")]
pub async fn create_user(State(state): State<Arc<AppState>>) -> Result<Json<User>, CcError> {
    let user = state.store.create_user().await?;
    Ok(Json(user))
}

/// `GET /api/me` - the authenticated user.
pub async fn get_me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}
