use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, warn};
use uuid::Uuid;

use parlor_db::Database;
use parlor_types::events::{MessageChange, ParticipantSnapshot};
use parlor_types::models::{MessageKind, MessageRecord, ParticipantRecord, RoomRecord};

use crate::watch::{MessageWatch, ParticipantWatch};

/// Per-room feed channel capacity.
const FEED_CAPACITY: usize = 1024;

/// Write-through document store with room-scoped live feeds.
///
/// Every mutation commits to the database first and is then published to the
/// room's watchers, so a writer observes its own change the same way every
/// other client does. The one deliberate exception is `append_message`,
/// which publishes an optimistic `Added` echo with a pending timestamp
/// before the commit and a `Modified` confirmation after it.
#[derive(Clone)]
pub struct LiveStore {
    inner: Arc<LiveStoreInner>,
}

struct LiveStoreInner {
    db: Arc<Database>,

    /// Per-room message feeds: slug -> change-batch sender
    message_feeds: RwLock<HashMap<String, broadcast::Sender<Vec<MessageChange>>>>,

    /// Per-room participant feeds: slug -> snapshot sender
    participant_feeds: RwLock<HashMap<String, broadcast::Sender<ParticipantSnapshot>>>,
}

impl LiveStore {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(LiveStoreInner {
                db: Arc::new(db),
                message_feeds: RwLock::new(HashMap::new()),
                participant_feeds: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Run a blocking database closure off the async runtime.
    async fn with_db<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }

    // -- Rooms --

    pub async fn room_exists(&self, slug: &str) -> Result<bool> {
        let slug = slug.to_string();
        self.with_db(move |db| db.room_exists(&slug)).await
    }

    pub async fn read_room(&self, slug: &str) -> Result<Option<RoomRecord>> {
        let slug = slug.to_string();
        self.with_db(move |db| db.get_room(&slug)).await
    }

    /// Conditional create — fails if the slug is already taken, never
    /// overwrites an existing digest.
    pub async fn create_room(&self, slug: &str, password_digest: &str) -> Result<RoomRecord> {
        let slug = slug.to_string();
        let digest = password_digest.to_string();

        self.with_db(move |db| {
            let created_at = db.next_timestamp()?;
            if !db.create_room(&slug, &digest, created_at)? {
                return Err(anyhow!("room '{}' already exists", slug));
            }
            Ok(RoomRecord {
                slug,
                password_digest: digest,
                created_at,
            })
        })
        .await
    }

    // -- Participants --

    pub async fn list_participants(&self, slug: &str) -> Result<Vec<ParticipantRecord>> {
        let slug = slug.to_string();
        self.with_db(move |db| db.list_participants(&slug)).await
    }

    pub async fn get_participant(&self, slug: &str, client_id: &str) -> Result<Option<ParticipantRecord>> {
        let slug = slug.to_string();
        let client_id = client_id.to_string();
        self.with_db(move |db| db.get_participant(&slug, &client_id)).await
    }

    pub async fn upsert_participant(&self, slug: &str, client_id: &str, name: &str) -> Result<ParticipantRecord> {
        let record = {
            let slug = slug.to_string();
            let client_id = client_id.to_string();
            let name = name.to_string();
            self.with_db(move |db| {
                let joined_at = db.next_timestamp()?;
                db.upsert_participant(&slug, &client_id, &name, joined_at)?;
                Ok(ParticipantRecord {
                    room_slug: slug,
                    client_id,
                    name,
                    joined_at,
                })
            })
            .await?
        };

        self.publish_roster(slug).await?;
        Ok(record)
    }

    /// Refresh joined_at only (idempotent rejoin).
    pub async fn touch_participant(&self, slug: &str, client_id: &str) -> Result<()> {
        {
            let slug = slug.to_string();
            let client_id = client_id.to_string();
            self.with_db(move |db| {
                let joined_at = db.next_timestamp()?;
                db.touch_participant(&slug, &client_id, joined_at)
            })
            .await?;
        }

        self.publish_roster(slug).await
    }

    pub async fn delete_participant(&self, slug: &str, client_id: &str) -> Result<bool> {
        let removed = {
            let slug = slug.to_string();
            let client_id = client_id.to_string();
            self.with_db(move |db| db.delete_participant(&slug, &client_id)).await?
        };

        if removed {
            self.publish_roster(slug).await?;
        }
        Ok(removed)
    }

    // -- Messages --

    /// Append a message to a room's log.
    ///
    /// Watchers first receive an `Added` echo with a pending (`None`)
    /// timestamp, then a `Modified` carrying the server-assigned one once
    /// the write has committed. If the commit fails the echo is retracted
    /// with a `Removed` so no watcher is left rendering a phantom message.
    pub async fn append_message(
        &self,
        slug: &str,
        kind: MessageKind,
        text: &str,
        sender_id: &str,
        sender_name: Option<&str>,
    ) -> Result<Uuid> {
        let pending = MessageRecord {
            id: Uuid::new_v4(),
            room_slug: slug.to_string(),
            kind,
            text: text.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(str::to_string),
            timestamp: None,
        };
        let id = pending.id;

        self.publish_changes(slug, vec![MessageChange::Added(pending.clone())]).await;

        let committed = {
            let record = pending.clone();
            self.with_db(move |db| {
                let sent_at = db.next_timestamp()?;
                db.insert_message(&record, sent_at)?;
                Ok(sent_at)
            })
            .await
        };

        match committed {
            Ok(sent_at) => {
                let mut confirmed = pending;
                confirmed.timestamp = Some(sent_at);
                self.publish_changes(slug, vec![MessageChange::Modified(confirmed)]).await;
                Ok(id)
            }
            Err(e) => {
                warn!("append to '{}' failed, retracting echo: {}", slug, e);
                self.publish_changes(slug, vec![MessageChange::Removed { id }]).await;
                Err(e)
            }
        }
    }

    pub async fn list_messages(&self, slug: &str) -> Result<Vec<MessageRecord>> {
        let slug = slug.to_string();
        self.with_db(move |db| db.list_messages(&slug)).await
    }

    pub async fn list_message_ids(&self, slug: &str) -> Result<Vec<Uuid>> {
        let slug = slug.to_string();
        self.with_db(move |db| db.list_message_ids(&slug)).await
    }

    /// Atomically delete a batch of messages, then publish the removals as
    /// one change batch.
    pub async fn delete_messages_batch(&self, slug: &str, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let removed = {
            let slug = slug.to_string();
            let ids = ids.to_vec();
            self.with_db(move |db| db.delete_messages_batch(&slug, &ids)).await?
        };

        let batch: Vec<MessageChange> =
            ids.iter().map(|&id| MessageChange::Removed { id }).collect();
        self.publish_changes(slug, batch).await;

        Ok(removed)
    }

    // -- Live feeds --

    /// Subscribe to a room's message feed. The current backlog is delivered
    /// as the first batch; live changes follow. Dropping the returned handle
    /// unsubscribes.
    pub async fn watch_messages(&self, slug: &str) -> Result<MessageWatch> {
        // Subscribe before the backlog read: a write racing this call is
        // then delivered twice rather than never, and consumers are
        // idempotent against duplicates.
        let rx = {
            let mut feeds = self.inner.message_feeds.write().await;
            feeds
                .entry(slug.to_string())
                .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
                .subscribe()
        };

        let backlog = self.list_messages(slug).await?;
        debug!("message watch on '{}' starts with {} backlog entries", slug, backlog.len());

        Ok(MessageWatch {
            initial: Some(backlog.into_iter().map(MessageChange::Added).collect()),
            rx,
        })
    }

    /// Subscribe to a room's participant roster. The current roster is
    /// delivered immediately; every later change re-delivers the full set.
    pub async fn watch_participants(&self, slug: &str) -> Result<ParticipantWatch> {
        let rx = {
            let mut feeds = self.inner.participant_feeds.write().await;
            feeds
                .entry(slug.to_string())
                .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
                .subscribe()
        };

        let participants = self.list_participants(slug).await?;

        Ok(ParticipantWatch {
            initial: Some(ParticipantSnapshot {
                room_slug: slug.to_string(),
                participants,
            }),
            rx,
        })
    }

    async fn publish_changes(&self, slug: &str, batch: Vec<MessageChange>) {
        let feeds = self.inner.message_feeds.read().await;
        if let Some(tx) = feeds.get(slug) {
            // send only fails with zero receivers, which is not an error here
            let _ = tx.send(batch);
        }
    }

    async fn publish_roster(&self, slug: &str) -> Result<()> {
        let snapshot = ParticipantSnapshot {
            room_slug: slug.to_string(),
            participants: self.list_participants(slug).await?,
        };

        let feeds = self.inner.participant_feeds.read().await;
        if let Some(tx) = feeds.get(slug) {
            let _ = tx.send(snapshot);
        }
        Ok(())
    }
}
