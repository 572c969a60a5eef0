use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use parlor_types::events::{MessageChange, ParticipantSnapshot};

/// One delivery from a live feed.
#[derive(Debug)]
pub enum FeedItem<T> {
    /// Normal delivery.
    Item(T),
    /// The receiver fell behind and `skipped` deliveries were dropped.
    /// Consumers should resynchronize from a direct store read.
    Lagged { skipped: u64 },
}

/// Live subscription to a room's message feed.
///
/// Delivers unordered batches of incremental changes; the room's existing
/// backlog arrives as the first batch. Dropping the handle is the disposer:
/// nothing is delivered afterwards.
pub struct MessageWatch {
    pub(crate) initial: Option<Vec<MessageChange>>,
    pub(crate) rx: broadcast::Receiver<Vec<MessageChange>>,
}

impl MessageWatch {
    /// Next change batch. Pends until the store publishes one.
    pub async fn next_batch(&mut self) -> FeedItem<Vec<MessageChange>> {
        if let Some(backlog) = self.initial.take() {
            return FeedItem::Item(backlog);
        }

        loop {
            match self.rx.recv().await {
                Ok(batch) => return FeedItem::Item(batch),
                Err(RecvError::Lagged(skipped)) => return FeedItem::Lagged { skipped },
                // Sender dropped: the store itself is gone. Pend forever so
                // a select! over this feed simply never fires again.
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

/// Live subscription to a room's participant roster.
///
/// Full-snapshot semantics: every delivery replaces prior state entirely, so
/// a lagged receiver loses nothing it cannot recover from the next snapshot.
pub struct ParticipantWatch {
    pub(crate) initial: Option<ParticipantSnapshot>,
    pub(crate) rx: broadcast::Receiver<ParticipantSnapshot>,
}

impl ParticipantWatch {
    /// Next roster snapshot. Pends until the store publishes one.
    pub async fn next_snapshot(&mut self) -> ParticipantSnapshot {
        if let Some(snapshot) = self.initial.take() {
            return snapshot;
        }

        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return snapshot,
                // Skipped snapshots are subsumed by the next one.
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}
