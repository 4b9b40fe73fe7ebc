//! Card vocabulary and inbound channel events.
//!
//! A participant shows exactly one [`CardState`] at a time. Clients change it
//! by sending a JSON payload over the meeting WebSocket:
//!
//! ```json
//! {"event": "card_change", "pid": "<participation uuid>", "state": "question"}
//! ```
//!
//! [`ChannelEvent::from_payload`] validates such a payload and resolves the
//! participant through the store. Parsing has no side effects.

use crate::errors::{CcError, EventError};
use crate::store::{ParticipantRecord, ParticipantStore};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Wire tag of the card change event.
pub const CARD_CHANGE_EVENT: &str = "card_change";

/// The signal a participant currently shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    #[default]
    None,
    Warm,
    Cool,
    Question,
    QuestionWarm,
    QuestionCool,
    MoveOn,
}

impl CardState {
    /// Every card state, in declaration order.
    pub const ALL: [CardState; 7] = [
        CardState::None,
        CardState::Warm,
        CardState::Cool,
        CardState::Question,
        CardState::QuestionWarm,
        CardState::QuestionCool,
        CardState::MoveOn,
    ];

    /// True for the three states that put the participant in the question queue.
    #[must_use]
    pub const fn is_question(self) -> bool {
        matches!(
            self,
            CardState::Question | CardState::QuestionWarm | CardState::QuestionCool
        )
    }

    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            CardState::None => "none",
            CardState::Warm => "warm",
            CardState::Cool => "cool",
            CardState::Question => "question",
            CardState::QuestionWarm => "question_warm",
            CardState::QuestionCool => "question_cool",
            CardState::MoveOn => "move_on",
        }
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardState {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CardState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EventError::InvalidCardState(s.to_string()))
    }
}

/// An event folded into a meeting's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The participant switched to `new_state`.
    CardChange {
        participation: ParticipantRecord,
        new_state: CardState,
    },
}

impl ChannelEvent {
    /// The participant this event is about.
    #[must_use]
    pub fn participation(&self) -> &ParticipantRecord {
        match self {
            ChannelEvent::CardChange { participation, .. } => participation,
        }
    }

    /// Validate an inbound payload received on `meeting_code`'s socket.
    ///
    /// Checks run in a fixed order: `event` present, `pid` present, `pid`
    /// resolves to a participant of this meeting, `event` is known, then the
    /// event-specific fields.
    ///
    /// # Errors
    ///
    /// - `CcError::Event` for every client-input problem
    /// - `CcError::Store` if the participant lookup itself fails
    pub async fn from_payload(
        store: &dyn ParticipantStore,
        meeting_code: &str,
        payload: &Value,
    ) -> Result<Self, CcError> {
        let event_type = payload
            .get("event")
            .ok_or(EventError::MalformedEvent("event type"))?;
        let pid = payload
            .get("pid")
            .ok_or(EventError::MalformedEvent("pid"))?;

        let participation = resolve_pid(store, meeting_code, pid).await?;

        match event_type.as_str() {
            Some(CARD_CHANGE_EVENT) => {
                let new_state = match payload.get("state") {
                    None => return Err(EventError::MalformedEvent("state").into()),
                    Some(Value::String(s)) => s.parse::<CardState>()?,
                    Some(other) => {
                        return Err(EventError::InvalidCardState(other.to_string()).into())
                    }
                };
                Ok(ChannelEvent::CardChange {
                    participation,
                    new_state,
                })
            }
            Some(other) => Err(EventError::UnknownEventType(other.to_string()).into()),
            None => Err(EventError::UnknownEventType(event_type.to_string()).into()),
        }
    }
}

/// Resolve a raw `pid` value to a participant that belongs to `meeting_code`.
async fn resolve_pid(
    store: &dyn ParticipantStore,
    meeting_code: &str,
    pid: &Value,
) -> Result<ParticipantRecord, CcError> {
    let id = pid
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or(EventError::UnknownParticipant)?;

    match store.resolve_participant(id).await? {
        Some(record) if record.meeting_code == meeting_code => Ok(record),
        _ => Err(EventError::UnknownParticipant.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;

    async fn store_with_meeting() -> (InMemoryStore, String, ParticipantRecord) {
        let store = InMemoryStore::new();
        let user = store.create_user().await.unwrap();
        let (meeting, host) = store
            .create_meeting(user.id, "Standup", "Alice", false)
            .await
            .unwrap();
        (store, meeting.short_code, host)
    }

    #[test]
    fn test_is_question_truth_table() {
        let questions: Vec<CardState> = CardState::ALL
            .into_iter()
            .filter(|s| s.is_question())
            .collect();
        assert_eq!(
            questions,
            vec![
                CardState::Question,
                CardState::QuestionWarm,
                CardState::QuestionCool
            ]
        );
    }

    #[test]
    fn test_card_state_wire_names_match_serde() {
        for state in CardState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state.as_str()));
            assert_eq!(state.as_str().parse::<CardState>().unwrap(), state);
        }
    }

    #[test]
    fn test_card_state_parse_rejects_unknown() {
        let result = "hot".parse::<CardState>();
        assert_eq!(result, Err(EventError::InvalidCardState("hot".to_string())));
    }

    #[test]
    fn test_card_state_default_is_none() {
        assert_eq!(CardState::default(), CardState::None);
    }

    #[tokio::test]
    async fn test_from_payload_card_change() {
        let (store, code, host) = store_with_meeting().await;
        let payload = json!({"event": "card_change", "pid": host.id.to_string(), "state": "question_warm"});

        let event = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap();

        assert_eq!(
            event,
            ChannelEvent::CardChange {
                participation: host,
                new_state: CardState::QuestionWarm,
            }
        );
    }

    #[tokio::test]
    async fn test_from_payload_missing_event() {
        let (store, code, host) = store_with_meeting().await;
        let payload = json!({"pid": host.id.to_string(), "state": "warm"});

        let err = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CcError::Event(EventError::MalformedEvent("event type"))
        ));
    }

    #[tokio::test]
    async fn test_from_payload_missing_pid() {
        let (store, code, _) = store_with_meeting().await;
        let payload = json!({"event": "card_change", "state": "warm"});

        let err = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CcError::Event(EventError::MalformedEvent("pid"))));
    }

    #[tokio::test]
    async fn test_from_payload_non_object_is_malformed() {
        let (store, code, _) = store_with_meeting().await;

        let err = ChannelEvent::from_payload(&store, &code, &json!([1, 2, 3]))
            .await
            .unwrap_err();
        assert!(matches!(err, CcError::Event(EventError::MalformedEvent(_))));
    }

    #[tokio::test]
    async fn test_from_payload_unknown_participant() {
        let (store, code, _) = store_with_meeting().await;

        for pid in [json!(Uuid::new_v4().to_string()), json!("not-a-uuid"), json!(42)] {
            let payload = json!({"event": "card_change", "pid": pid, "state": "warm"});
            let err = ChannelEvent::from_payload(&store, &code, &payload)
                .await
                .unwrap_err();
            assert!(matches!(err, CcError::Event(EventError::UnknownParticipant)));
        }
    }

    #[tokio::test]
    async fn test_from_payload_participant_of_other_meeting_is_unknown() {
        let (store, code, _) = store_with_meeting().await;
        let other_user = store.create_user().await.unwrap();
        let (other_meeting, other_host) = store
            .create_meeting(other_user.id, "Retro", "Bob", false)
            .await
            .unwrap();

        let payload = json!({"event": "card_change", "pid": other_host.id.to_string(), "state": "warm"});
        assert!(
            ChannelEvent::from_payload(&store, &other_meeting.short_code, &payload)
                .await
                .is_ok()
        );

        // Valid pid, but sent on another meeting's socket.
        let err = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CcError::Event(EventError::UnknownParticipant)));
    }

    #[tokio::test]
    async fn test_from_payload_unknown_event_type() {
        let (store, code, host) = store_with_meeting().await;
        let payload = json!({"event": "lower_all_cards", "pid": host.id.to_string()});

        let err = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CcError::Event(EventError::UnknownEventType(ref t)) if t == "lower_all_cards"
        ));
    }

    #[tokio::test]
    async fn test_from_payload_invalid_and_missing_state() {
        let (store, code, host) = store_with_meeting().await;

        let payload = json!({"event": "card_change", "pid": host.id.to_string(), "state": "hot"});
        let err = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CcError::Event(EventError::InvalidCardState(_))));

        let payload = json!({"event": "card_change", "pid": host.id.to_string()});
        let err = ChannelEvent::from_payload(&store, &code, &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, CcError::Event(EventError::MalformedEvent("state"))));
    }
}
