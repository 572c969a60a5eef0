use parlor_store::{MessageWatch, ParticipantWatch};

use crate::presence::PresenceTracker;
use crate::reconcile::MessageReconciler;

/// Everything owned for the room currently being entered or inhabited.
///
/// Constructed fresh each time a room flow starts and dropped wholesale on
/// every room change or leave — there is no ambient session state anywhere
/// else. Dropping the contained watch handles is what unsubscribes, so
/// teardown is synchronous and total by construction.
pub struct SessionContext {
    pub slug: String,
    /// Display name, set once name selection succeeds.
    pub name: Option<String>,
    /// Live feeds plus their reconciliation state; present only in chat.
    pub subs: Option<RoomSubscriptions>,
}

impl SessionContext {
    pub fn new(slug: &str) -> Self {
        Self {
            slug: slug.to_string(),
            name: None,
            subs: None,
        }
    }
}

/// The two live subscriptions for a room and the per-room state they feed.
pub struct RoomSubscriptions {
    pub messages: MessageWatch,
    pub participants: ParticipantWatch,
    pub reconciler: MessageReconciler,
    pub presence: PresenceTracker,
}

impl RoomSubscriptions {
    pub fn new(messages: MessageWatch, participants: ParticipantWatch, self_id: &str) -> Self {
        Self {
            messages,
            participants,
            reconciler: MessageReconciler::new(self_id),
            presence: PresenceTracker::new(),
        }
    }
}
