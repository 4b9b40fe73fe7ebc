//! Meeting state: card folding, question order and snapshots.
//!
//! [`MeetingState`] is plain data owned by exactly one channel actor. It never
//! suspends, so a fold is always applied in full.

use crate::cards::{CardState, ChannelEvent};
use crate::errors::CcError;
use crate::store::{ParticipantRecord, Role};

use ring::digest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Question-queue edge produced by folding one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionTransition {
    Unchanged,
    /// Moved from a non-question state into a question state.
    Raised,
    /// Moved from a question state into a non-question state.
    Lowered,
}

/// One participant's live card.
#[derive(Debug, Clone)]
pub struct ParticipationState {
    participation: ParticipantRecord,
    card_state: CardState,
}

impl ParticipationState {
    #[must_use]
    pub fn new(participation: ParticipantRecord) -> Self {
        Self {
            participation,
            card_state: CardState::None,
        }
    }

    #[must_use]
    pub fn participation(&self) -> &ParticipantRecord {
        &self.participation
    }

    #[must_use]
    pub fn card_state(&self) -> CardState {
        self.card_state
    }

    /// Fold `event` and report whether it crossed the question boundary.
    ///
    /// Moves between two question states (or between two non-question
    /// states) are `Unchanged`.
    pub fn apply_event(&mut self, event: &ChannelEvent) -> QuestionTransition {
        let old_state = self.card_state;
        match event {
            ChannelEvent::CardChange { new_state, .. } => self.card_state = *new_state,
        }

        match (old_state.is_question(), self.card_state.is_question()) {
            (false, true) => QuestionTransition::Raised,
            (true, false) => QuestionTransition::Lowered,
            _ => QuestionTransition::Unchanged,
        }
    }
}

/// Participant entry of a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotParticipant {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub card_state: CardState,
}

/// Full observable view of a meeting, as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sorted by case-insensitive name; ties keep roster order.
    pub participants: Vec<SnapshotParticipant>,
    /// Participants with an open question, oldest raise first.
    pub questions: Vec<Uuid>,
}

impl Snapshot {
    /// Canonical JSON form. Field order is fixed by the struct layout, so
    /// equal snapshots always serialize to identical bytes.
    pub fn to_json(&self) -> Result<String, CcError> {
        serde_json::to_string(self)
            .map_err(|e| CcError::Internal(format!("snapshot serialization failed: {e}")))
    }

    /// SHA-256 of a serialized snapshot, used for broadcast de-duplication.
    #[must_use]
    pub fn digest(json: &str) -> Vec<u8> {
        digest::digest(&digest::SHA256, json.as_bytes())
            .as_ref()
            .to_vec()
    }
}

/// Card state of every participant of one meeting.
#[derive(Debug, Default)]
pub struct MeetingState {
    participants: HashMap<Uuid, ParticipationState>,
    /// Roster order; breaks name ties in snapshots.
    order: Vec<Uuid>,
    /// Participants with an open question, in raise order.
    questions: Vec<Uuid>,
}

impl MeetingState {
    /// Seed from the store's current roster. Everyone starts at `none`.
    #[must_use]
    pub fn new(roster: Vec<ParticipantRecord>) -> Self {
        let mut state = Self::default();
        state.set_participants(roster);
        state
    }

    /// Fold one event.
    ///
    /// A participant missing from the roster is added on the fly so that an
    /// event racing a membership refresh is not lost.
    pub fn apply_event(&mut self, event: &ChannelEvent) -> QuestionTransition {
        let participation = event.participation();
        let id = participation.id;

        let transition = match self.participants.get_mut(&id) {
            Some(existing) => existing.apply_event(event),
            None => {
                let mut fresh = ParticipationState::new(participation.clone());
                let transition = fresh.apply_event(event);
                self.participants.insert(id, fresh);
                self.order.push(id);
                transition
            }
        };

        match transition {
            QuestionTransition::Raised if !self.questions.contains(&id) => {
                self.questions.push(id);
            }
            QuestionTransition::Lowered => self.questions.retain(|q| *q != id),
            _ => {}
        }

        transition
    }

    /// Replace the roster wholesale.
    ///
    /// Participants present before and after keep their card; newcomers
    /// start at `none`. Departed participants are dropped, including from
    /// the question order.
    pub fn set_participants(&mut self, roster: Vec<ParticipantRecord>) {
        let mut previous = std::mem::take(&mut self.participants);
        self.order.clear();

        for record in roster {
            let id = record.id;
            if self.participants.contains_key(&id) {
                continue;
            }
            let card_state = previous
                .remove(&id)
                .map_or(CardState::None, |old| old.card_state);
            self.participants.insert(
                id,
                ParticipationState {
                    participation: record,
                    card_state,
                },
            );
            self.order.push(id);
        }

        let participants = &self.participants;
        self.questions.retain(|id| participants.contains_key(id));
    }

    /// Build the client-facing view of the current state.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let mut entries: Vec<&ParticipationState> = self
            .order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .collect();
        // Stable sort: equal names keep roster order.
        entries.sort_by_cached_key(|p| p.participation.name.to_lowercase());

        Snapshot {
            participants: entries
                .into_iter()
                .map(|p| SnapshotParticipant {
                    id: p.participation.id,
                    name: p.participation.name.clone(),
                    role: p.participation.role,
                    card_state: p.card_state,
                })
                .collect(),
            questions: self.questions.clone(),
        }
    }

    /// Records of the simulated participants, in roster order.
    #[must_use]
    pub fn simulated_participants(&self) -> Vec<ParticipantRecord> {
        self.order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .filter(|p| p.participation.simulated)
            .map(|p| p.participation.clone())
            .collect()
    }

    #[must_use]
    pub fn has_simulated_participants(&self) -> bool {
        self.participants.values().any(|p| p.participation.simulated)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn card_state(&self, participation_id: Uuid) -> Option<CardState> {
        self.participants.get(&participation_id).map(|p| p.card_state)
    }

    #[must_use]
    pub fn questions(&self) -> &[Uuid] {
        &self.questions
    }
}
