use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use parlor_types::events::MessageChange;
use parlor_types::models::MessageRecord;

use crate::render::{MessageView, RenderSurface};

/// What a batch application did, for the notification layer.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Rows newly inserted into the view.
    pub inserted: usize,
    /// Subset of `inserted` whose sender is not this client.
    pub from_others: u32,
}

/// Incremental reconciliation of a room's message feed.
///
/// The feed delivers add/modify/remove batches with no ordering guarantee,
/// within a batch or across batches. This keeps an ordered index keyed by
/// message id and sorted by timestamp — a pending (`None`) timestamp sorts
/// before any assigned one, and ties keep delivery order — so the rendered
/// list is consistent no matter how delivery was interleaved.
pub struct MessageReconciler {
    self_id: String,
    index: Vec<MessageRecord>,
}

impl MessageReconciler {
    pub fn new(self_id: &str) -> Self {
        Self {
            self_id: self_id.to_string(),
            index: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Apply one change batch and render the effects.
    pub fn apply_batch<R: RenderSurface + ?Sized>(
        &mut self,
        batch: Vec<MessageChange>,
        surface: &mut R,
    ) -> BatchOutcome {
        // Capture before mutating: a reader scrolled back must stay put.
        let follow = surface.near_bottom();

        let mut adds: Vec<MessageRecord> = Vec::new();
        for change in batch {
            match change {
                MessageChange::Added(record) => {
                    // Duplicate delivery (at-least-once feed) is a no-op
                    let seen = self.position_of(record.id).is_some()
                        || adds.iter().any(|a| a.id == record.id);
                    if !seen {
                        adds.push(record);
                    }
                }
                MessageChange::Modified(record) => self.apply_modified(record, surface),
                MessageChange::Removed { id } => {
                    if let Some(pos) = self.position_of(id) {
                        self.index.remove(pos);
                        surface.remove_message(id);
                    }
                }
            }
        }

        // Stable sort: ties and pending timestamps keep delivery order
        adds.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        let mut outcome = BatchOutcome::default();
        for record in adds {
            if record.sender_id != self.self_id {
                outcome.from_others += 1;
            }
            let pos = self.insert_pos(record.timestamp);
            surface.insert_message(pos, MessageView::of(&record, &self.self_id));
            self.index.insert(pos, record);
            outcome.inserted += 1;
        }

        if follow && outcome.inserted > 0 {
            surface.scroll_to_bottom();
        }

        outcome
    }

    /// Rebuild the whole view from a direct store read (lag recovery).
    pub fn resync<R: RenderSurface + ?Sized>(&mut self, records: Vec<MessageRecord>, surface: &mut R) {
        surface.clear_messages();
        self.index = records;
        self.index.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

        for (pos, record) in self.index.iter().enumerate() {
            surface.insert_message(pos, MessageView::of(record, &self.self_id));
        }
        if !self.index.is_empty() {
            surface.scroll_to_bottom();
        }
    }

    /// Drop all local state without waiting for removal echoes — the bulk
    /// clear path, which renders the empty room immediately.
    pub fn clear_local<R: RenderSurface + ?Sized>(&mut self, surface: &mut R) {
        self.index.clear();
        surface.clear_messages();
    }

    /// A modification is in practice a timestamp confirmation (pending →
    /// server-assigned). The row's timestamp is patched in place; when the
    /// confirmed timestamp changes the row's sorted position, the row moves
    /// and only the affected position is re-rendered.
    fn apply_modified<R: RenderSurface + ?Sized>(&mut self, record: MessageRecord, surface: &mut R) {
        let Some(pos) = self.position_of(record.id) else {
            debug!("modify for unknown message {}, ignoring", record.id);
            return;
        };

        let mut entry = self.index.remove(pos);
        let changed = entry.timestamp != record.timestamp;
        entry.timestamp = record.timestamp;

        let new_pos = self.insert_pos(entry.timestamp);
        if new_pos == pos {
            if changed {
                if let Some(ts) = entry.timestamp {
                    surface.patch_timestamp(entry.id, ts);
                }
            }
            self.index.insert(pos, entry);
        } else {
            surface.remove_message(entry.id);
            surface.insert_message(new_pos, MessageView::of(&entry, &self.self_id));
            self.index.insert(new_pos, entry);
        }
    }

    fn position_of(&self, id: Uuid) -> Option<usize> {
        self.index.iter().position(|m| m.id == id)
    }

    /// Upper-bound insertion keeps the sort stable: equal keys append after
    /// their peers. `Option`'s ordering puts `None` (pending) first.
    fn insert_pos(&self, timestamp: Option<DateTime<Utc>>) -> usize {
        self.index.partition_point(|m| m.timestamp <= timestamp)
    }
}
