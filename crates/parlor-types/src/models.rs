use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender id carried by event messages (join/leave/clear announcements).
pub const SYSTEM_SENDER: &str = "system";

/// A password-gated chat room. The digest is immutable once set; rooms are
/// never deleted, only their message log is clearable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomRecord {
    pub slug: String,
    pub password_digest: String,
    pub created_at: DateTime<Utc>,
}

/// A client's active membership in a room, one record per (room, client).
///
/// `name` is case-preserving but uniqueness within a room is enforced
/// case-insensitively against *other* client ids — the same client may
/// re-acquire its own name on rejoin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub room_slug: String,
    pub client_id: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Text typed by a participant.
    User,
    /// System announcement (joined / left / history cleared).
    Event,
}

/// One entry in a room's append-only message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub room_slug: String,
    pub kind: MessageKind,
    /// Raw UTF-8, may embed newlines; never interpreted as markup.
    pub text: String,
    /// Client identity of the sender, or [`SYSTEM_SENDER`] for events.
    pub sender_id: String,
    /// Display name snapshot at send time; `None` for event messages.
    pub sender_name: Option<String>,
    /// Server-assigned. `None` only transiently between optimistic issue
    /// and server confirmation.
    pub timestamp: Option<DateTime<Utc>>,
}

impl MessageRecord {
    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }
}
