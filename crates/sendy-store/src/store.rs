//! The store contract and its record types.

use async_trait::async_trait;
use thiserror::Error;

use sendy_proto::PeerId;

/// Longest accepted contact name, in bytes.
pub const MAX_CONTACT_NAME: usize = 256;

/// Per-installation contact cap.
pub const MAX_CONTACT_COUNT: usize = 10_000;

/// Largest journaled message body, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("contact name cannot be empty")]
    EmptyName,
    #[error("contact name too long: {0} bytes (max {MAX_CONTACT_NAME})")]
    NameTooLong(usize),
    #[error("contact limit reached ({MAX_CONTACT_COUNT})")]
    ContactLimit,
    #[error("message too large: {0} bytes (max {MAX_MESSAGE_SIZE})")]
    MessageTooLarge(usize),
    #[error("contact not found")]
    NotFound,
    #[error("storage operation failed: {0}")]
    Backend(String),
}

/// Which way a journaled message travelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Contact {
    pub peer_id: PeerId,
    pub name: String,
    /// Unix seconds.
    pub added_at: i64,
    /// Unix seconds.
    pub last_seen: i64,
    pub is_blocked: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub peer_id: PeerId,
    pub content: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub direction: Direction,
    pub is_read: bool,
}

/// A search hit, carrying the contact name for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub message: Message,
    pub contact_name: String,
}

/// The contract the connector and chat layer consume. Implementations
/// enforce the limits above.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Idempotent insert: a second upsert under the same peer id updates
    /// the name and nothing else.
    async fn upsert_contact(&self, peer_id: PeerId, name: &str) -> Result<(), StoreError>;

    async fn contact(&self, peer_id: PeerId) -> Result<Option<Contact>, StoreError>;

    /// All contacts, most recently seen first.
    async fn contacts(&self) -> Result<Vec<Contact>, StoreError>;

    async fn record_last_seen(&self, peer_id: PeerId) -> Result<(), StoreError>;

    async fn set_blocked(&self, peer_id: PeerId, blocked: bool) -> Result<(), StoreError>;

    async fn blocked_peers(&self) -> Result<Vec<PeerId>, StoreError>;

    async fn remove_contact(&self, peer_id: PeerId) -> Result<(), StoreError>;

    /// Journal one message. Returns its assigned id.
    async fn append_message(
        &self,
        peer_id: PeerId,
        content: &str,
        direction: Direction,
        timestamp: i64,
    ) -> Result<i64, StoreError>;

    /// The newest `limit` messages with `peer_id`, oldest first.
    async fn load_messages(&self, peer_id: PeerId, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// Case-insensitive substring search across every contact's history,
    /// newest first. An empty query matches nothing.
    async fn search_messages(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>, StoreError>;

    async fn unread_count(&self, peer_id: PeerId) -> Result<u64, StoreError>;

    async fn mark_read(&self, peer_id: PeerId) -> Result<(), StoreError>;
}

/// Shared validation used by every backend.
pub(crate) fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::EmptyName);
    }
    if name.len() > MAX_CONTACT_NAME {
        return Err(StoreError::NameTooLong(name.len()));
    }
    Ok(())
}

pub(crate) fn validate_message(content: &str) -> Result<(), StoreError> {
    if content.len() > MAX_MESSAGE_SIZE {
        return Err(StoreError::MessageTooLarge(content.len()));
    }
    Ok(())
}
