use parlor_types::events::ParticipantSnapshot;
use parlor_types::models::ParticipantRecord;

use crate::render::ParticipantView;

/// Roster reconciliation for one room.
///
/// The participant feed delivers the full current set on every change, so
/// this tracker rebuilds from scratch each time instead of patching — the
/// deliberate opposite of the message reconciler's incremental strategy.
/// There is no heartbeat: "online" means "row exists", nothing more.
#[derive(Debug)]
pub struct PresenceTracker {
    roster: Vec<ParticipantRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self { roster: Vec::new() }
    }

    /// Replace the roster with a fresh snapshot, ordered by join time.
    pub fn rebuild(&mut self, snapshot: ParticipantSnapshot) {
        let mut participants = snapshot.participants;
        participants.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        self.roster = participants;
    }

    pub fn roster(&self) -> &[ParticipantRecord] {
        &self.roster
    }

    pub fn views(&self, self_id: &str) -> Vec<ParticipantView> {
        self.roster.iter().map(|p| ParticipantView::of(p, self_id)).collect()
    }
}
