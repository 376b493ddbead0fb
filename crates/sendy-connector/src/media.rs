//! The pluggable media-transport seam.
//!
//! The connector only assumes an ICE-style offer/answer/gathering contract
//! and a reliable, ordered, datagram-oriented application channel. Anything
//! satisfying these traits (a WebRTC stack, a QUIC bridge, the in-process
//! hub in [`crate::memory`]) can carry sessions.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("connection closed")]
    Closed,
    #[error("data channel is not open")]
    NotOpen,
    #[error("remote description rejected: {0}")]
    BadDescription(String),
    #[error("media transport failure: {0}")]
    Failed(String),
}

/// Creates peer connections. One provider is shared by every session of a
/// connector.
#[async_trait]
pub trait MediaProvider: Send + Sync + 'static {
    async fn new_connection(&self) -> Result<Arc<dyn MediaConnection>, MediaError>;
}

/// One peer connection in the making or established.
///
/// The offering side calls `create_offer`, later `accept_answer`, and owns
/// the channel it created with `open_channel`. The answering side calls
/// `create_answer` and adopts the remote channel via `accept_channel`.
#[async_trait]
pub trait MediaConnection: Send + Sync + 'static {
    /// Produce the local offer description (sets it locally).
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Apply a remote offer and produce the local answer description.
    async fn create_answer(&self, offer: &str) -> Result<String, MediaError>;

    /// Apply the remote answer to our earlier offer.
    async fn accept_answer(&self, answer: &str) -> Result<(), MediaError>;

    /// Resolves when ICE-style candidate gathering is complete. Unbounded;
    /// callers apply their own deadline.
    async fn wait_ice_gathering(&self) -> Result<(), MediaError>;

    /// Create the outbound application channel (reliable, ordered).
    async fn open_channel(&self) -> Result<Arc<dyn DataChannel>, MediaError>;

    /// Resolve the channel created by the remote side.
    async fn accept_channel(&self) -> Result<Arc<dyn DataChannel>, MediaError>;

    /// Tear the connection down; the channel observes closure.
    async fn close(&self);
}

/// A reliable, ordered, message-boundary-preserving application channel.
#[async_trait]
pub trait DataChannel: Send + Sync + 'static {
    /// Resolves once the channel is open end to end.
    async fn wait_open(&self) -> Result<(), MediaError>;

    fn is_open(&self) -> bool;

    /// Send one message. Fails synchronously when the channel is not open.
    async fn send(&self, data: &[u8]) -> Result<(), MediaError>;

    /// Receive the next message; `None` once the channel is closed.
    async fn recv(&self) -> Option<Vec<u8>>;

    async fn close(&self);
}
