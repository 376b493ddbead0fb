//! In-memory store for tests and ephemeral runs.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use sendy_proto::PeerId;

use crate::store::{
    validate_message, validate_name, Contact, ContactStore, Direction, Message, SearchResult,
    StoreError, MAX_CONTACT_COUNT,
};

#[derive(Default)]
struct Inner {
    contacts: HashMap<PeerId, Contact>,
    messages: Vec<Message>,
    next_id: i64,
}

/// Hash-map-backed store with the same semantics as the SQLite one.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl ContactStore for MemoryStore {
    async fn upsert_contact(&self, peer_id: PeerId, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let mut inner = self.inner.lock();
        if !inner.contacts.contains_key(&peer_id) && inner.contacts.len() >= MAX_CONTACT_COUNT {
            return Err(StoreError::ContactLimit);
        }
        let now = now_unix();
        inner
            .contacts
            .entry(peer_id)
            .and_modify(|c| c.name = name.to_string())
            .or_insert(Contact {
                peer_id,
                name: name.to_string(),
                added_at: now,
                last_seen: now,
                is_blocked: false,
            });
        Ok(())
    }

    async fn contact(&self, peer_id: PeerId) -> Result<Option<Contact>, StoreError> {
        Ok(self.inner.lock().contacts.get(&peer_id).cloned())
    }

    async fn contacts(&self) -> Result<Vec<Contact>, StoreError> {
        let mut out: Vec<Contact> = self.inner.lock().contacts.values().cloned().collect();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(out)
    }

    async fn record_last_seen(&self, peer_id: PeerId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let contact = inner.contacts.get_mut(&peer_id).ok_or(StoreError::NotFound)?;
        contact.last_seen = now_unix();
        Ok(())
    }

    async fn set_blocked(&self, peer_id: PeerId, blocked: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let contact = inner.contacts.get_mut(&peer_id).ok_or(StoreError::NotFound)?;
        contact.is_blocked = blocked;
        Ok(())
    }

    async fn blocked_peers(&self) -> Result<Vec<PeerId>, StoreError> {
        Ok(self
            .inner
            .lock()
            .contacts
            .values()
            .filter(|c| c.is_blocked)
            .map(|c| c.peer_id)
            .collect())
    }

    async fn remove_contact(&self, peer_id: PeerId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.contacts.remove(&peer_id).is_none() {
            return Err(StoreError::NotFound);
        }
        inner.messages.retain(|m| m.peer_id != peer_id);
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
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.messages.push(Message {
            id,
            peer_id,
            content: content.to_string(),
            timestamp,
            direction,
            is_read: direction == Direction::Outgoing,
        });
        Ok(id)
    }

    async fn load_messages(&self, peer_id: PeerId, limit: usize) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.lock();
        let mut out: Vec<Message> = inner
            .messages
            .iter()
            .filter(|m| m.peer_id == peer_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        if out.len() > limit {
            let excess = out.len() - limit;
            out.drain(..excess);
        }
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
        let needle = query.to_lowercase();
        let inner = self.inner.lock();

        let mut hits: Vec<SearchResult> = inner
            .messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .filter_map(|m| {
                inner.contacts.get(&m.peer_id).map(|c| SearchResult {
                    message: m.clone(),
                    contact_name: c.name.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            (b.message.timestamp, b.message.id).cmp(&(a.message.timestamp, a.message.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn unread_count(&self, peer_id: PeerId) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .lock()
            .messages
            .iter()
            .filter(|m| m.peer_id == peer_id && !m.is_read)
            .count() as u64)
    }

    async fn mark_read(&self, peer_id: PeerId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for m in inner.messages.iter_mut().filter(|m| m.peer_id == peer_id) {
            m.is_read = true;
        }
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
    async fn mirrors_sqlite_semantics() {
        let store = MemoryStore::new();
        store.upsert_contact(pid(1), "alice").await.unwrap();
        store.upsert_contact(pid(1), "renamed").await.unwrap();
        assert_eq!(store.contact(pid(1)).await.unwrap().unwrap().name, "renamed");

        store
            .append_message(pid(1), "a", Direction::Incoming, 1)
            .await
            .unwrap();
        store
            .append_message(pid(1), "b", Direction::Incoming, 2)
            .await
            .unwrap();
        assert_eq!(store.unread_count(pid(1)).await.unwrap(), 2);

        let msgs = store.load_messages(pid(1), 1).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "b");

        store.mark_read(pid(1)).await.unwrap();
        assert_eq!(store.unread_count(pid(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_contact_reports_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.record_last_seen(pid(7)).await,
            Err(StoreError::NotFound)
        ));
    }
}
