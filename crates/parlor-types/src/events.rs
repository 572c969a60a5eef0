use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageRecord, ParticipantRecord};

/// Incremental change delivered on a room's message feed.
///
/// Batches carry no ordering guarantee, neither within a batch nor across
/// batches — consumers must order by timestamp themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MessageChange {
    /// A new message entered the log. Its timestamp may still be pending
    /// (`None`) when this is the optimistic echo of a local write.
    Added(MessageRecord),

    /// An existing message changed — in practice only the transition from
    /// a pending to a server-assigned timestamp.
    Modified(MessageRecord),

    /// A message was deleted from the log.
    Removed { id: Uuid },
}

impl MessageChange {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Added(m) | Self::Modified(m) => m.id,
            Self::Removed { id } => *id,
        }
    }
}

/// Full-state snapshot delivered on a room's participant feed.
///
/// Unlike the message feed this is not a diff: every change re-delivers the
/// complete current roster and consumers rebuild from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub room_slug: String,
    pub participants: Vec<ParticipantRecord>,
}
