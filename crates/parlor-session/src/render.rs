use chrono::{DateTime, Utc};
use uuid::Uuid;

use parlor_types::models::{MessageRecord, ParticipantRecord};

use crate::machine::Phase;

/// How a message row is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    /// System announcement: centered, neutral, no sender name.
    Event,
    /// This client's own message: right-aligned.
    Own,
    /// Another participant's message: left-aligned, sender name shown.
    Other,
}

/// Message row handed to the render surface.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: Uuid,
    pub presentation: Presentation,
    /// Shown only for [`Presentation::Other`].
    pub sender_name: Option<String>,
    pub text: String,
    /// `None` renders as a pending placeholder until confirmation.
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageView {
    pub fn of(record: &MessageRecord, self_id: &str) -> Self {
        let presentation = if record.is_event() {
            Presentation::Event
        } else if record.sender_id == self_id {
            Presentation::Own
        } else {
            Presentation::Other
        };

        Self {
            id: record.id,
            presentation,
            sender_name: match presentation {
                Presentation::Other => record.sender_name.clone(),
                _ => None,
            },
            text: record.text.clone(),
            timestamp: record.timestamp,
        }
    }
}

/// Roster row handed to the render surface, ordered by join time.
#[derive(Debug, Clone)]
pub struct ParticipantView {
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub is_self: bool,
}

impl ParticipantView {
    pub fn of(record: &ParticipantRecord, self_id: &str) -> Self {
        Self {
            name: record.name.clone(),
            joined_at: record.joined_at,
            is_self: record.client_id == self_id,
        }
    }
}

/// The rendering boundary. The session core drives one of these; what lies
/// behind it (DOM, terminal, test recorder) is outside the core.
pub trait RenderSurface: Send {
    /// Current-phase selector: exactly one phase is visible at a time.
    fn show_phase(&mut self, phase: Phase);

    /// Inline error slot for the currently shown phase.
    fn show_error(&mut self, message: &str);
    fn clear_error(&mut self);

    /// Insert a message row at `position` in the ordered render list.
    fn insert_message(&mut self, position: usize, view: MessageView);

    /// Patch the displayed timestamp of an already-rendered row in place.
    fn patch_timestamp(&mut self, id: Uuid, timestamp: DateTime<Utc>);

    /// Remove a rendered row; unknown ids are a no-op.
    fn remove_message(&mut self, id: Uuid);

    /// Drop the whole rendered message list (bulk clear).
    fn clear_messages(&mut self);

    /// Replace the participant roster.
    fn set_participants(&mut self, roster: &[ParticipantView]);

    /// Unseen-count/title signal; 0 restores the plain title.
    fn set_unseen(&mut self, count: u32);

    /// Whether the view is within the follow threshold of the newest
    /// content. Queried before applying a batch so a reader scrolled back
    /// into history is not yanked to the bottom.
    fn near_bottom(&self) -> bool;
    fn scroll_to_bottom(&mut self);

    /// Optimistic input handling: cleared on submit, restored on failure.
    fn clear_input(&mut self);
    fn restore_input(&mut self, text: &str);
}
