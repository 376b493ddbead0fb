//! SQLite-backed store.
//!
//! One connection in WAL mode behind a mutex; peer ids are stored as hex
//! text, timestamps as unix seconds.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use sendy_proto::PeerId;

use crate::store::{
    validate_message, validate_name, Contact, ContactStore, Direction, Message, SearchResult,
    StoreError, MAX_CONTACT_COUNT,
};

const SCHEMA_VERSION: i32 = 1;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(backend)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(backend)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<(), StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )
        .map_err(backend)?;

        let current: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS contacts (
                    peer_id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    added_at INTEGER NOT NULL,
                    last_seen INTEGER NOT NULL,
                    is_blocked INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    peer_id TEXT NOT NULL,
                    content TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    is_outgoing INTEGER NOT NULL,
                    is_read INTEGER NOT NULL DEFAULT 0,
                    FOREIGN KEY(peer_id) REFERENCES contacts(peer_id)
                );

                CREATE INDEX IF NOT EXISTS idx_messages_peer_timestamp
                ON messages(peer_id, timestamp DESC);

                CREATE INDEX IF NOT EXISTS idx_messages_unread
                ON messages(peer_id, is_read) WHERE is_read = 0;

                INSERT INTO schema_version (version) VALUES (1);
                "#,
            )
            .map_err(backend)?;
        }

        debug_assert!(current <= SCHEMA_VERSION);
        Ok(())
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn peer_key(peer_id: PeerId) -> String {
    peer_id.to_string()
}

fn parse_peer(text: &str) -> Result<PeerId, StoreError> {
    text.parse()
        .map_err(|_| StoreError::Backend(format!("corrupt peer id in database: {text}")))
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, i64, i64, bool)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get::<_, i64>(4)? != 0,
    ))
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ContactStore for SqliteStore {
    async fn upsert_contact(&self, peer_id: PeerId, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let conn = self.conn.lock().await;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .map_err(backend)?;
        if count as usize >= MAX_CONTACT_COUNT {
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM contacts WHERE peer_id = ?1",
                    params![peer_key(peer_id)],
                    |row| row.get(0),
                )
                .optional()
                .map_err(backend)?;
            if exists.is_none() {
                return Err(StoreError::ContactLimit);
            }
        }

        let now = now_unix();
        conn.execute(
            "INSERT INTO contacts (peer_id, name, added_at, last_seen, is_blocked)
             VALUES (?1, ?2, ?3, ?3, 0)
             ON CONFLICT(peer_id) DO UPDATE SET name = excluded.name",
            params![peer_key(peer_id), name, now],
        )
        .map_err(backend)?;
        Ok(())
    }

    async fn contact(&self, peer_id: PeerId) -> Result<Option<Contact>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT peer_id, name, added_at, last_seen, is_blocked
                 FROM contacts WHERE peer_id = ?1",
                params![peer_key(peer_id)],
                row_to_contact,
            )
            .optional()
            .map_err(backend)?;

        row.map(|(id, name, added_at, last_seen, is_blocked)| {
            Ok(Contact {
                peer_id: parse_peer(&id)?,
                name,
                added_at,
                last_seen,
                is_blocked,
            })
        })
        .transpose()
    }

    async fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT peer_id, name, added_at, last_seen, is_blocked
                 FROM contacts ORDER BY last_seen DESC",
            )
            .map_err(backend)?;
        let rows = stmt.query_map([], row_to_contact).map_err(backend)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, name, added_at, last_seen, is_blocked) = row.map_err(backend)?;
            out.push(Contact {
                peer_id: parse_peer(&id)?,
                name,
                added_at,
                last_seen,
                is_blocked,
            });
        }
        Ok(out)
    }

    async fn record_last_seen(&self, peer_id: PeerId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE contacts SET last_seen = ?1 WHERE peer_id = ?2",
                params![now_unix(), peer_key(peer_id)],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn set_blocked(&self, peer_id: PeerId, blocked: bool) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let changed = conn
            .execute(
                "UPDATE contacts SET is_blocked = ?1 WHERE peer_id = ?2",
                params![blocked as i64, peer_key(peer_id)],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn blocked_peers(&self) -> Result<Vec<PeerId>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT peer_id FROM contacts WHERE is_blocked = 1")
            .map_err(backend)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(backend)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(parse_peer(&row.map_err(backend)?)?);
        }
        Ok(out)
    }

    async fn remove_contact(&self, peer_id: PeerId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM messages WHERE peer_id = ?1",
            params![peer_key(peer_id)],
        )
        .map_err(backend)?;
        let changed = conn
            .execute(
                "DELETE FROM contacts WHERE peer_id = ?1",
                params![peer_key(peer_id)],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_message(
        &self,
        peer_id: PeerId,
        content: &str,
        direction: Direction,
        timestamp: i64,
    ) -> Result<i64, StoreError> {
        validate_message(content)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (peer_id, content, timestamp, is_outgoing, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                peer_key(peer_id),
                content,
                timestamp,
                (direction == Direction::Outgoing) as i64,
                // Our own messages are born read.
                (direction == Direction::Outgoing) as i64,
            ],
        )
        .map_err(backend)?;
        Ok(conn.last_insert_rowid())
    }

    async fn load_messages(&self, peer_id: PeerId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT id, peer_id, content, timestamp, is_outgoing, is_read
                 FROM messages WHERE peer_id = ?1
                 ORDER BY timestamp DESC, id DESC LIMIT ?2",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![peer_key(peer_id), limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)? != 0,
                    row.get::<_, i64>(5)? != 0,
                ))
            })
            .map_err(backend)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, peer, content, timestamp, is_outgoing, is_read) = row.map_err(backend)?;
            out.push(Message {
                id,
                peer_id: parse_peer(&peer)?,
                content,
                timestamp,
                direction: if is_outgoing {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                },
                is_read,
            });
        }
        // Newest-limit slice, presented oldest first.
        out.reverse();
        Ok(out)
    }

    async fn search_messages(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!("%{query}%");

        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.peer_id, m.content, m.timestamp, m.is_outgoing, m.is_read, c.name
                 FROM messages m
                 JOIN contacts c ON m.peer_id = c.peer_id
                 WHERE m.content LIKE ?1 COLLATE NOCASE
                 ORDER BY m.timestamp DESC
                 LIMIT ?2",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)? != 0,
                    row.get::<_, i64>(5)? != 0,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(backend)?;

        let mut out = Vec::new();
        for row in rows {
            let (id, peer, content, timestamp, is_outgoing, is_read, name) =
                row.map_err(backend)?;
            out.push(SearchResult {
                message: Message {
                    id,
                    peer_id: parse_peer(&peer)?,
                    content,
                    timestamp,
                    direction: if is_outgoing {
                        Direction::Outgoing
                    } else {
                        Direction::Incoming
                    },
                    is_read,
                },
                contact_name: name,
            });
        }
        Ok(out)
    }

    async fn unread_count(&self, peer_id: PeerId) -> Result<u64, StoreError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE peer_id = ?1 AND is_read = 0",
                params![peer_key(peer_id)],
                |row| row.get(0),
            )
            .map_err(backend)?;
        Ok(count as u64)
    }

    async fn mark_read(&self, peer_id: PeerId) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE messages SET is_read = 1 WHERE peer_id = ?1 AND is_read = 0",
            params![peer_key(peer_id)],
        )
        .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(b: u8) -> PeerId {
        PeerId([b; 32])
    }

    #[tokio::test]
    async fn upsert_is_idempotent_and_updates_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_contact(pid(1), "alice").await.unwrap();
        store.upsert_contact(pid(1), "alice-renamed").await.unwrap();

        let contact = store.contact(pid(1)).await.unwrap().unwrap();
        assert_eq!(contact.name, "alice-renamed");
        assert_eq!(store.contacts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn name_limits_are_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.upsert_contact(pid(1), "").await,
            Err(StoreError::EmptyName)
        ));
        let long = "x".repeat(257);
        assert!(matches!(
            store.upsert_contact(pid(1), &long).await,
            Err(StoreError::NameTooLong(_))
        ));
    }

    #[tokio::test]
    async fn messages_round_trip_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_contact(pid(2), "bob").await.unwrap();

        store
            .append_message(pid(2), "first", Direction::Outgoing, 100)
            .await
            .unwrap();
        store
            .append_message(pid(2), "second", Direction::Incoming, 200)
            .await
            .unwrap();
        store
            .append_message(pid(2), "third", Direction::Incoming, 300)
            .await
            .unwrap();

        let messages = store.load_messages(pid(2), 2).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "second");
        assert_eq!(messages[1].content, "third");
        assert_eq!(messages[1].direction, Direction::Incoming);
    }

    #[tokio::test]
    async fn unread_tracking() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_contact(pid(3), "carol").await.unwrap();

        store
            .append_message(pid(3), "hi", Direction::Incoming, 1)
            .await
            .unwrap();
        store
            .append_message(pid(3), "there", Direction::Incoming, 2)
            .await
            .unwrap();
        store
            .append_message(pid(3), "mine", Direction::Outgoing, 3)
            .await
            .unwrap();

        assert_eq!(store.unread_count(pid(3)).await.unwrap(), 2);
        store.mark_read(pid(3)).await.unwrap();
        assert_eq!(store.unread_count(pid(3)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blocking_flag_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_contact(pid(4), "dave").await.unwrap();

        store.set_blocked(pid(4), true).await.unwrap();
        assert_eq!(store.blocked_peers().await.unwrap(), vec![pid(4)]);
        assert!(store.contact(pid(4)).await.unwrap().unwrap().is_blocked);

        store.set_blocked(pid(4), false).await.unwrap();
        assert!(store.blocked_peers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn operations_on_missing_contacts_report_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.record_last_seen(pid(9)).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.set_blocked(pid(9), true).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.remove_contact(pid(9)).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn remove_contact_drops_its_messages() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_contact(pid(5), "eve").await.unwrap();
        store
            .append_message(pid(5), "bye", Direction::Incoming, 1)
            .await
            .unwrap();

        store.remove_contact(pid(5)).await.unwrap();
        assert!(store.contact(pid(5)).await.unwrap().is_none());
        assert!(store.load_messages(pid(5), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_contact(pid(7), "grace").await.unwrap();
        store.upsert_contact(pid(8), "heidi").await.unwrap();

        store
            .append_message(pid(7), "Deploy finished", Direction::Incoming, 10)
            .await
            .unwrap();
        store
            .append_message(pid(8), "redeploy tomorrow", Direction::Outgoing, 20)
            .await
            .unwrap();
        store
            .append_message(pid(7), "unrelated", Direction::Incoming, 30)
            .await
            .unwrap();

        let hits = store.search_messages("DEPLOY", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].message.content, "redeploy tomorrow");
        assert_eq!(hits[0].contact_name, "heidi");
        assert_eq!(hits[1].contact_name, "grace");

        assert!(store.search_messages("", 10).await.unwrap().is_empty());
        assert_eq!(store.search_messages("deploy", 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("chat.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert_contact(pid(6), "frank").await.unwrap();
            store
                .append_message(pid(6), "persisted", Direction::Outgoing, 42)
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.contact(pid(6)).await.unwrap().unwrap().name, "frank");
        assert_eq!(
            store.load_messages(pid(6), 10).await.unwrap()[0].content,
            "persisted"
        );
    }
}
