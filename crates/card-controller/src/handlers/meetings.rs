//! Meeting and participation management.
//!
//! Every mutation of a meeting's roster ends with a channel refresh so that
//! connected observers see the change.

use crate::errors::CcError;
use crate::routes::AppState;
use crate::store::{Meeting, ParticipantRecord, Role, User};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Longest accepted meeting or display name, in characters.
const MAX_NAME_LENGTH: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateMeetingRequest {
    pub meeting_name: String,
    pub user_name: String,
    #[serde(default)]
    pub anonymous: bool,
}

#[derive(Debug, Deserialize)]
pub struct JoinMeetingRequest {
    pub user_name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct MeetingView {
    pub short_code: String,
    pub name: String,
    pub anonymous: bool,
}

#[derive(Debug, Serialize)]
pub struct ParticipationView {
    pub id: Uuid,
    pub name: String,
}

/// A meeting together with the caller's participation in it.
#[derive(Debug, Serialize)]
pub struct MeetingResponse {
    pub meeting: MeetingView,
    pub participation: ParticipationView,
}

impl MeetingResponse {
    fn new(meeting: Meeting, participation: ParticipantRecord) -> Self {
        Self {
            meeting: MeetingView {
                short_code: meeting.short_code,
                name: meeting.name,
                anonymous: meeting.anonymous,
            },
            participation: ParticipationView {
                id: participation.id,
                name: participation.name,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SimulatedParticipantResponse {
    pub name: String,
}

/// `POST /api/meetings` - create a meeting with the caller as host.
#[instrument(skip_all, name = "cc.handlers.meetings.create")]
pub async fn create_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateMeetingRequest>,
) -> Result<Json<MeetingResponse>, CcError> {
    let meeting_name = validated_name("meeting_name", &request.meeting_name)?;
    let user_name = validated_name("user_name", &request.user_name)?;

    let (meeting, host) = state
        .store
        .create_meeting(user.id, meeting_name, user_name, request.anonymous)
        .await?;

    info!(
        target: "cc.handlers.meetings",
        meeting_code = %meeting.short_code,
        "Meeting created"
    );

    Ok(Json(MeetingResponse::new(meeting, host)))
}

/// `GET /api/meetings/:code` - the meeting and the caller's participation.
#[instrument(skip_all, name = "cc.handlers.meetings.get", fields(meeting_code = %code))]
pub async fn get_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
) -> Result<Json<MeetingResponse>, CcError> {
    let meeting = meeting_by_code(&state, &code).await?;
    let participation = require_participation(&state, &code, &user).await?;
    Ok(Json(MeetingResponse::new(meeting, participation)))
}

/// `POST /api/meetings/:code/participants` - join, or rename an existing
/// participation.
#[instrument(skip_all, name = "cc.handlers.meetings.join", fields(meeting_code = %code))]
pub async fn join_meeting(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
    Json(request): Json<JoinMeetingRequest>,
) -> Result<Json<MeetingResponse>, CcError> {
    let meeting = meeting_by_code(&state, &code).await?;
    let user_name = validated_name("user_name", &request.user_name)?;

    let participation = state.store.join_meeting(&code, user.id, user_name).await?;
    refresh_channel(&state, &code).await?;

    Ok(Json(MeetingResponse::new(meeting, participation)))
}

/// `PATCH /api/meetings/:code/participants/:pid` - host-only role change.
#[instrument(skip_all, name = "cc.handlers.meetings.update_role", fields(meeting_code = %code))]
pub async fn update_participant_role(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path((code, pid)): Path<(String, Uuid)>,
    Json(request): Json<UpdateRoleRequest>,
) -> Result<StatusCode, CcError> {
    meeting_by_code(&state, &code).await?;
    require_host(&state, &code, &user, "Only hosts can update roles").await?;

    let updated = state.store.update_role(&code, pid, request.role).await?;
    refresh_channel(&state, &code).await?;

    info!(
        target: "cc.handlers.meetings",
        meeting_code = %code,
        participation_id = %updated.id,
        role = updated.role.as_str(),
        "Participant role updated"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/meetings/:code/participants/:pid` - host-only removal.
#[instrument(skip_all, name = "cc.handlers.meetings.remove", fields(meeting_code = %code))]
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path((code, pid)): Path<(String, Uuid)>,
) -> Result<StatusCode, CcError> {
    meeting_by_code(&state, &code).await?;
    require_host(&state, &code, &user, "Only host can remove participants").await?;

    let removed = state.store.remove_participant(&code, pid).await?;
    refresh_channel(&state, &code).await?;

    info!(
        target: "cc.handlers.meetings",
        meeting_code = %code,
        participation_id = %removed.id,
        "Participant removed"
    );

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/meetings/:code/simulated_participants` - host-only; adds a
/// simulated member with a generated name.
#[instrument(skip_all, name = "cc.handlers.meetings.simulate", fields(meeting_code = %code))]
pub async fn create_simulated_participant(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
) -> Result<Json<SimulatedParticipantResponse>, CcError> {
    meeting_by_code(&state, &code).await?;
    require_host(
        &state,
        &code,
        &user,
        "Only hosts can create simulated participants",
    )
    .await?;

    let simulated = state.store.add_simulated_participant(&code).await?;
    refresh_channel(&state, &code).await?;

    Ok(Json(SimulatedParticipantResponse {
        name: simulated.name,
    }))
}

/// `DELETE /api/meetings/:code/channel` - host-only flush of the live
/// channel. The next access rebuilds it from the store with every card
/// reset; open sockets are dropped.
#[instrument(skip_all, name = "cc.handlers.meetings.flush", fields(meeting_code = %code))]
pub async fn flush_channel(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
) -> Result<StatusCode, CcError> {
    meeting_by_code(&state, &code).await?;
    require_host(&state, &code, &user, "Only hosts can flush the channel").await?;

    let removed = state.registry.remove(&code).await?;

    info!(
        target: "cc.handlers.meetings",
        meeting_code = %code,
        removed,
        "Meeting channel flushed"
    );

    Ok(StatusCode::NO_CONTENT)
}

async fn meeting_by_code(state: &AppState, code: &str) -> Result<Meeting, CcError> {
    state
        .store
        .get_meeting(code)
        .await?
        .ok_or_else(|| CcError::MeetingNotFound(code.to_string()))
}

async fn require_participation(
    state: &AppState,
    code: &str,
    user: &User,
) -> Result<ParticipantRecord, CcError> {
    state
        .store
        .find_participation(code, user.id)
        .await?
        .ok_or_else(|| CcError::PermissionDenied("You have not joined this meeting".to_string()))
}

async fn require_host(
    state: &AppState,
    code: &str,
    user: &User,
    denial: &str,
) -> Result<ParticipantRecord, CcError> {
    let participation = require_participation(state, code, user).await?;
    if participation.role != Role::Host {
        return Err(CcError::PermissionDenied(denial.to_string()));
    }
    Ok(participation)
}

/// Push the store's current roster into the meeting's channel.
async fn refresh_channel(state: &AppState, code: &str) -> Result<(), CcError> {
    let store = state.participant_store();
    let channel = state.registry.get(code, Arc::clone(&store)).await?;
    channel.refresh_participants(store).await
}

fn validated_name<'a>(field: &str, raw: &'a str) -> Result<&'a str, CcError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(CcError::BadRequest(format!("{field} must not be empty")));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(CcError::BadRequest(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(name)
}
