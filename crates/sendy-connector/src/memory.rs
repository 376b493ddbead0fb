//! In-process media transport used by tests and the loopback demo.
//!
//! Connections rendezvous through a shared hub: the offerer parks a slot
//! under a random token carried in the offer string, the answerer claims it
//! and wires up a pair of in-memory queues. Message boundaries, ordering,
//! and reliability come for free.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use crate::media::{DataChannel, MediaConnection, MediaError, MediaProvider};

const SDP_PREFIX: &str = "memory:";

/// One direction of a wired-up connection.
struct Wires {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Shared rendezvous point. Every endpoint of a test or demo derives its
/// provider from the same hub.
pub struct MemoryMediaHub {
    pending: Mutex<HashMap<String, oneshot::Sender<Wires>>>,
}

impl MemoryMediaHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// A provider handle backed by this hub.
    pub fn provider(self: &Arc<Self>) -> Arc<dyn MediaProvider> {
        Arc::new(MemoryProvider { hub: self.clone() })
    }
}

struct MemoryProvider {
    hub: Arc<MemoryMediaHub>,
}

#[async_trait]
impl MediaProvider for MemoryProvider {
    async fn new_connection(&self) -> Result<Arc<dyn MediaConnection>, MediaError> {
        Ok(Arc::new(MemoryConnection {
            hub: self.hub.clone(),
            offered: Mutex::new(None),
            channel: Arc::new(MemoryChannel::new()),
        }))
    }
}

struct MemoryConnection {
    hub: Arc<MemoryMediaHub>,
    /// Set by `create_offer`: the parked token and the slot the answerer
    /// resolves with our wires.
    offered: Mutex<Option<(String, oneshot::Receiver<Wires>)>>,
    channel: Arc<MemoryChannel>,
}

fn parse_token(desc: &str) -> Result<&str, MediaError> {
    desc.strip_prefix(SDP_PREFIX)
        .ok_or_else(|| MediaError::BadDescription(format!("unrecognized description: {desc}")))
}

#[async_trait]
impl MediaConnection for MemoryConnection {
    async fn create_offer(&self) -> Result<String, MediaError> {
        let mut token_bytes = [0u8; 16];
        getrandom::getrandom(&mut token_bytes)
            .map_err(|e| MediaError::Failed(format!("token generation failed: {e}")))?;
        let token = hex::encode(token_bytes);

        let (tx, rx) = oneshot::channel();
        self.hub.pending.lock().insert(token.clone(), tx);
        *self.offered.lock() = Some((token.clone(), rx));

        Ok(format!("{SDP_PREFIX}{token}"))
    }

    async fn create_answer(&self, offer: &str) -> Result<String, MediaError> {
        let token = parse_token(offer)?;
        let slot = self
            .hub
            .pending
            .lock()
            .remove(token)
            .ok_or_else(|| MediaError::BadDescription(format!("no offer parked under {token}")))?;

        let (here_tx, there_rx) = mpsc::unbounded_channel();
        let (there_tx, here_rx) = mpsc::unbounded_channel();

        slot.send(Wires {
            tx: there_tx,
            rx: there_rx,
        })
        .map_err(|_| MediaError::Closed)?;

        self.channel
            .attach(Wires {
                tx: here_tx,
                rx: here_rx,
            })
            .await;

        Ok(format!("{SDP_PREFIX}{token}"))
    }

    async fn accept_answer(&self, answer: &str) -> Result<(), MediaError> {
        let token = parse_token(answer)?.to_string();
        let (offered_token, rx) = self
            .offered
            .lock()
            .take()
            .ok_or_else(|| MediaError::Failed("no offer outstanding".into()))?;
        if offered_token != token {
            return Err(MediaError::BadDescription(format!(
                "answer token {token} does not match offer {offered_token}"
            )));
        }

        let wires = rx.await.map_err(|_| MediaError::Closed)?;
        self.channel.attach(wires).await;
        Ok(())
    }

    async fn wait_ice_gathering(&self) -> Result<(), MediaError> {
        // Nothing to gather in process.
        Ok(())
    }

    async fn open_channel(&self) -> Result<Arc<dyn DataChannel>, MediaError> {
        Ok(self.channel.clone())
    }

    async fn accept_channel(&self) -> Result<Arc<dyn DataChannel>, MediaError> {
        Ok(self.channel.clone())
    }

    async fn close(&self) {
        // Unpark the token if the answer never came.
        if let Some((token, _rx)) = self.offered.lock().take() {
            self.hub.pending.lock().remove(&token);
        }
        self.channel.close().await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChannelState {
    Connecting,
    Open,
    Closed,
}

struct MemoryChannel {
    state: watch::Sender<ChannelState>,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
}

impl MemoryChannel {
    fn new() -> Self {
        let (state, _) = watch::channel(ChannelState::Connecting);
        Self {
            state,
            tx: Mutex::new(None),
            rx: tokio::sync::Mutex::new(None),
        }
    }

    async fn attach(&self, wires: Wires) {
        *self.tx.lock() = Some(wires.tx);
        *self.rx.lock().await = Some(wires.rx);
        self.state.send_replace(ChannelState::Open);
    }
}

#[async_trait]
impl DataChannel for MemoryChannel {
    async fn wait_open(&self) -> Result<(), MediaError> {
        let mut sub = self.state.subscribe();
        loop {
            match *sub.borrow_and_update() {
                ChannelState::Open => return Ok(()),
                ChannelState::Closed => return Err(MediaError::Closed),
                ChannelState::Connecting => {}
            }
            if sub.changed().await.is_err() {
                return Err(MediaError::Closed);
            }
        }
    }

    fn is_open(&self) -> bool {
        if *self.state.borrow() != ChannelState::Open {
            return false;
        }
        // The far side dropping its receiver also means closed.
        self.tx.lock().as_ref().map(|t| !t.is_closed()).unwrap_or(false)
    }

    async fn send(&self, data: &[u8]) -> Result<(), MediaError> {
        if *self.state.borrow() != ChannelState::Open {
            return Err(MediaError::NotOpen);
        }
        let tx = self.tx.lock().as_ref().cloned().ok_or(MediaError::NotOpen)?;
        tx.send(data.to_vec()).map_err(|_| MediaError::Closed)
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        if self.wait_open().await.is_err() {
            return None;
        }
        let mut guard = self.rx.lock().await;
        let rx = guard.as_mut()?;
        let mut sub = self.state.subscribe();
        loop {
            // Re-check at the top: a close racing the subscription would
            // otherwise go unobserved.
            if *sub.borrow_and_update() == ChannelState::Closed {
                return None;
            }
            tokio::select! {
                msg = rx.recv() => return msg,
                changed = sub.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn close(&self) {
        self.state.send_replace(ChannelState::Closed);
        // Dropping our sender lets the far side's recv observe closure.
        self.tx.lock().take();
    }
}
