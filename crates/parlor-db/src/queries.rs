use anyhow::{Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use parlor_types::models::{MessageKind, MessageRecord, ParticipantRecord, RoomRecord};

use crate::Database;

impl Database {
    // -- Rooms --

    /// Conditional create: returns true if the room was created, false if a
    /// record for the slug already existed. Never overwrites.
    pub fn create_room(&self, slug: &str, password_digest: &str, created_at: DateTime<Utc>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "INSERT INTO rooms (slug, password_digest, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(slug) DO NOTHING",
                (slug, password_digest, encode_ts(created_at)),
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_room(&self, slug: &str) -> Result<Option<RoomRecord>> {
        self.with_conn(|conn| query_room(conn, slug))
    }

    pub fn room_exists(&self, slug: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found = conn
                .query_row("SELECT 1 FROM rooms WHERE slug = ?1", [slug], |_| Ok(()))
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Participants --

    pub fn list_participants(&self, slug: &str) -> Result<Vec<ParticipantRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT room_slug, client_id, name, joined_at FROM participants
                 WHERE room_slug = ?1 ORDER BY joined_at ASC",
            )?;

            let rows = stmt
                .query_map([slug], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(room_slug, client_id, name, joined_at)| {
                    Ok(ParticipantRecord {
                        room_slug,
                        client_id,
                        name,
                        joined_at: decode_ts(&joined_at)?,
                    })
                })
                .collect()
        })
    }

    pub fn get_participant(&self, slug: &str, client_id: &str) -> Result<Option<ParticipantRecord>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT name, joined_at FROM participants
                     WHERE room_slug = ?1 AND client_id = ?2",
                    [slug, client_id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;

            match row {
                Some((name, joined_at)) => Ok(Some(ParticipantRecord {
                    room_slug: slug.to_string(),
                    client_id: client_id.to_string(),
                    name,
                    joined_at: decode_ts(&joined_at)?,
                })),
                None => Ok(None),
            }
        })
    }

    pub fn upsert_participant(
        &self,
        slug: &str,
        client_id: &str,
        name: &str,
        joined_at: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO participants (room_slug, client_id, name, joined_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(room_slug, client_id)
                 DO UPDATE SET name = excluded.name, joined_at = excluded.joined_at",
                (slug, client_id, name, encode_ts(joined_at)),
            )?;
            Ok(())
        })
    }

    /// Refresh joined_at only — the idempotent-rejoin path, where the name
    /// must stay untouched and no join event is emitted.
    pub fn touch_participant(&self, slug: &str, client_id: &str, joined_at: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE participants SET joined_at = ?3
                 WHERE room_slug = ?1 AND client_id = ?2",
                (slug, client_id, encode_ts(joined_at)),
            )?;
            if changed == 0 {
                return Err(anyhow!("no participant {} in room {}", client_id, slug));
            }
            Ok(())
        })
    }

    /// Returns true if a record was actually removed.
    pub fn delete_participant(&self, slug: &str, client_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "DELETE FROM participants WHERE room_slug = ?1 AND client_id = ?2",
                [slug, client_id],
            )?;
            Ok(changed == 1)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, msg: &MessageRecord, sent_at: DateTime<Utc>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_slug, kind, body, sender_id, sender_name, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    msg.id.to_string(),
                    msg.room_slug,
                    kind_to_str(msg.kind),
                    msg.text,
                    msg.sender_id,
                    msg.sender_name,
                    encode_ts(sent_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_messages(&self, slug: &str) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| query_messages(conn, slug))
    }

    pub fn list_message_ids(&self, slug: &str) -> Result<Vec<Uuid>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM messages WHERE room_slug = ?1")?;
            let rows = stmt
                .query_map([slug], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.iter()
                .map(|id| Uuid::parse_str(id).map_err(|e| anyhow!("corrupt message id '{}': {}", id, e)))
                .collect()
        })
    }

    /// Delete a set of messages in one transaction — all or nothing.
    /// Returns the number of rows removed.
    pub fn delete_messages_batch(&self, slug: &str, ids: &[Uuid]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = {
                let placeholders: Vec<String> =
                    (2..=ids.len() + 1).map(|i| format!("?{}", i)).collect();
                let sql = format!(
                    "DELETE FROM messages WHERE room_slug = ?1 AND id IN ({})",
                    placeholders.join(", ")
                );

                let id_strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
                let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&slug];
                params.extend(id_strings.iter().map(|id| id as &dyn rusqlite::types::ToSql));

                tx.execute(&sql, params.as_slice())?
            };
            tx.commit()?;
            Ok(removed)
        })
    }
}

fn query_room(conn: &Connection, slug: &str) -> Result<Option<RoomRecord>> {
    let row = conn
        .query_row(
            "SELECT slug, password_digest, created_at FROM rooms WHERE slug = ?1",
            [slug],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((slug, password_digest, created_at)) => Ok(Some(RoomRecord {
            slug,
            password_digest,
            created_at: decode_ts(&created_at)?,
        })),
        None => Ok(None),
    }
}

fn query_messages(conn: &Connection, slug: &str) -> Result<Vec<MessageRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, room_slug, kind, body, sender_id, sender_name, sent_at
         FROM messages WHERE room_slug = ?1 ORDER BY sent_at ASC",
    )?;

    let rows = stmt
        .query_map([slug], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, room_slug, kind, body, sender_id, sender_name, sent_at)| {
            Ok(MessageRecord {
                id: Uuid::parse_str(&id).map_err(|e| anyhow!("corrupt message id '{}': {}", id, e))?,
                room_slug,
                kind: kind_from_str(&kind)?,
                text: body,
                sender_id,
                sender_name,
                timestamp: Some(decode_ts(&sent_at)?),
            })
        })
        .collect()
}

/// Timestamps are stored as RFC 3339 with microseconds and a literal Z
/// suffix, which keeps lexicographic and chronological order identical for
/// `ORDER BY sent_at`.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| anyhow!("corrupt timestamp '{}': {}", raw, e))
}

fn kind_to_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::User => "user",
        MessageKind::Event => "event",
    }
}

fn kind_from_str(raw: &str) -> Result<MessageKind> {
    match raw {
        "user" => Ok(MessageKind::User),
        "event" => Ok(MessageKind::Event),
        other => Err(anyhow!("unknown message kind '{}'", other)),
    }
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parlor_types::models::SYSTEM_SENDER;

    fn test_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn seed_room(db: &Database, slug: &str) {
        let ts = db.next_timestamp().unwrap();
        assert!(db.create_room(slug, "digest", ts).unwrap());
    }

    #[test]
    fn create_room_is_conditional() {
        let db = test_db();
        let ts = db.next_timestamp().unwrap();
        assert!(db.create_room("team-x", "aaa", ts).unwrap());
        assert!(!db.create_room("team-x", "bbb", ts).unwrap());

        // First writer wins, digest untouched
        let room = db.get_room("team-x").unwrap().unwrap();
        assert_eq!(room.password_digest, "aaa");
    }

    #[test]
    fn upsert_then_touch_keeps_name() {
        let db = test_db();
        seed_room(&db, "team-x");

        let t0 = db.next_timestamp().unwrap();
        db.upsert_participant("team-x", "client-a", "Alice", t0).unwrap();

        let t1 = db.next_timestamp().unwrap();
        db.touch_participant("team-x", "client-a", t1).unwrap();

        let p = db.get_participant("team-x", "client-a").unwrap().unwrap();
        assert_eq!(p.name, "Alice");
        assert_eq!(p.joined_at, t1);
    }

    #[test]
    fn touch_unknown_participant_fails() {
        let db = test_db();
        seed_room(&db, "team-x");
        let ts = db.next_timestamp().unwrap();
        assert!(db.touch_participant("team-x", "ghost", ts).is_err());
    }

    #[test]
    fn participants_sorted_by_joined_at() {
        let db = test_db();
        seed_room(&db, "team-x");

        for (client, name) in [("c1", "Zoe"), ("c2", "Ann"), ("c3", "Mia")] {
            let ts = db.next_timestamp().unwrap();
            db.upsert_participant("team-x", client, name, ts).unwrap();
        }

        let names: Vec<String> = db
            .list_participants("team-x")
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Zoe", "Ann", "Mia"]);
    }

    #[test]
    fn delete_messages_batch_removes_only_listed_ids() {
        let db = test_db();
        seed_room(&db, "team-x");

        let mut ids = Vec::new();
        for i in 0..5 {
            let msg = MessageRecord {
                id: Uuid::new_v4(),
                room_slug: "team-x".into(),
                kind: MessageKind::User,
                text: format!("msg {}", i),
                sender_id: "client-a".into(),
                sender_name: Some("Alice".into()),
                timestamp: None,
            };
            let ts = db.next_timestamp().unwrap();
            db.insert_message(&msg, ts).unwrap();
            ids.push(msg.id);
        }

        let removed = db.delete_messages_batch("team-x", &ids[..3]).unwrap();
        assert_eq!(removed, 3);

        let left = db.list_messages("team-x").unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|m| ids[3..].contains(&m.id)));
    }

    #[test]
    fn messages_round_trip_with_committed_timestamps() {
        let db = test_db();
        seed_room(&db, "team-x");

        let msg = MessageRecord {
            id: Uuid::new_v4(),
            room_slug: "team-x".into(),
            kind: MessageKind::Event,
            text: "Alice has joined the room.".into(),
            sender_id: SYSTEM_SENDER.into(),
            sender_name: None,
            timestamp: None,
        };
        let ts = db.next_timestamp().unwrap();
        db.insert_message(&msg, ts).unwrap();

        let listed = db.list_messages("team-x").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].kind, MessageKind::Event);
        assert_eq!(listed[0].timestamp, Some(ts));
    }
}
