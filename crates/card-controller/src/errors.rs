//! Card Controller error types.
//!
//! `CcError` maps to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to clients are intentionally generic for internal failures; the
//! actual errors are logged server-side.
//!
//! `EventError` covers inbound WebSocket payloads. Every variant is a
//! client-input error: the offending connection is closed with a policy
//! violation and the channel carries on.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// WebSocket close code for policy violations (RFC 6455 section 7.4.1).
pub const POLICY_VIOLATION_CLOSE_CODE: u16 = 1008;

/// Longest close reason that fits a control frame (125 bytes minus the code).
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Rejection of an inbound channel payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// A required field (`event`, `pid` or `state`) is absent.
    #[error("Missing {0}")]
    MalformedEvent(&'static str),

    /// `pid` does not resolve to a participant of this meeting.
    #[error("Unknown user")]
    UnknownParticipant,

    /// `event` names no known event kind.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// `state` is not a card state.
    #[error("Invalid card state: {0}")]
    InvalidCardState(String),
}

impl EventError {
    /// Returns the reason sent in the WebSocket close frame.
    ///
    /// Client-supplied values are echoed back, so the reason is cut to
    /// [`MAX_CLOSE_REASON_BYTES`] on a char boundary.
    #[must_use]
    pub fn close_reason(&self) -> String {
        let mut reason = self.to_string();
        if reason.len() > MAX_CLOSE_REASON_BYTES {
            let mut end = MAX_CLOSE_REASON_BYTES;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        reason
    }

    /// Returns a bounded label for the `cc_events_rejected_total` metric.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            EventError::MalformedEvent(_) => "malformed",
            EventError::UnknownParticipant => "unknown_participant",
            EventError::UnknownEventType(_) => "unknown_event_type",
            EventError::InvalidCardState(_) => "invalid_card_state",
        }
    }
}

/// Card Controller error type.
///
/// Maps to HTTP status codes:
/// - Store, Internal: 500 Internal Server Error
/// - InvalidToken: 401 Unauthorized
/// - PermissionDenied: 403 Forbidden
/// - MeetingNotFound, ParticipantNotFound: 404 Not Found
/// - Event, BadRequest: 400 Bad Request
#[derive(Debug, Error)]
pub enum CcError {
    /// Participant store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Meeting not found.
    #[error("Meeting not found: {0}")]
    MeetingNotFound(String),

    /// Participant not found.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Inbound channel event rejected.
    #[error("Event rejected: {0}")]
    Event(#[from] EventError),

    /// Bearer token missing, malformed or unknown.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Caller lacks the role required for the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Request body or parameters are invalid.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error (actor mailbox closed, response dropped, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CcError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            CcError::Store(_) | CcError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            CcError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            CcError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            CcError::MeetingNotFound(_) | CcError::ParticipantNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            CcError::Event(_) | CcError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CcError::Store(_) | CcError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            CcError::MeetingNotFound(_) => "Unknown meeting".to_string(),
            CcError::ParticipantNotFound(_) => "Participant not found".to_string(),
            CcError::Event(e) => e.to_string(),
            CcError::InvalidToken(reason)
            | CcError::PermissionDenied(reason)
            | CcError::BadRequest(reason) => reason.clone(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            CcError::Store(_) => "STORE_ERROR",
            CcError::Internal(_) => "INTERNAL_ERROR",
            CcError::MeetingNotFound(_) | CcError::ParticipantNotFound(_) => "NOT_FOUND",
            CcError::Event(_) => "INVALID_EVENT",
            CcError::InvalidToken(_) => "INVALID_TOKEN",
            CcError::PermissionDenied(_) => "FORBIDDEN",
            CcError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for CcError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            CcError::Store(err) => {
                tracing::error!(target: "cc.store", error = %err, "Store operation failed");
            }
            CcError::Internal(err) => {
                tracing::error!(target: "cc.errors", error = %err, "Internal error");
            }
            _ => {}
        }

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        // Add WWW-Authenticate header for 401 responses
        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"card-controller\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
