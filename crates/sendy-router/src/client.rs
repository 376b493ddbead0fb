//! Router client: dials the router, authenticates, and multiplexes
//! request/response frames over a single TCP connection.
//!
//! Replies from the router are matched to callers through a pending table
//! keyed by request id; `Income` deliveries go to a bounded inbound queue
//! handed out by [`Client::dial`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use sendy_crypto::Identity;
use sendy_proto::frame::{read_server_message, write_peer_message, ServerMessage, ServerMsgType};
use sendy_proto::{PeerId, RequestId, WireError, CHALLENGE_SIZE, REQUEST_ID_SIZE};

/// Capacity of the inbound delivery queue.
const INCOME_QUEUE_DEPTH: usize = 100;

/// Default per-request reply timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection closed")]
    Closed,
    #[error("request timed out")]
    TimedOut,
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A frame delivered to us by the router on behalf of another peer.
#[derive(Clone, Debug)]
pub struct Income {
    pub request_id: RequestId,
    pub sender: PeerId,
    pub payload: Vec<u8>,
}

/// Resolves to the router's reply for one sent frame.
#[derive(Debug)]
pub struct PendingReply {
    request_id: RequestId,
    rx: oneshot::Receiver<ServerMessage>,
    closed: Arc<AtomicBool>,
}

impl PendingReply {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Wait for the router's Success/Error/NotFound. Resolves `TimedOut`
    /// when the per-request timer reclaimed the slot first, `Closed` when
    /// the connection went away.
    pub async fn wait(self) -> Result<ServerMessage, ClientError> {
        match self.rx.await {
            Ok(msg) => Ok(msg),
            Err(_) if self.closed.load(Ordering::Acquire) => Err(ClientError::Closed),
            Err(_) => Err(ClientError::TimedOut),
        }
    }
}

/// Client side of the router connection.
pub struct Client {
    identity: Arc<Identity>,
    writer: Mutex<OwnedWriteHalf>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<ServerMessage>>>,
    request_timeout: parking_lot::RwLock<Duration>,
    closed: Arc<AtomicBool>,
}

impl Client {
    /// Dial the router, run the auth handshake, and spawn the read task.
    /// Returns the client and the inbound delivery queue.
    pub async fn dial(
        identity: Arc<Identity>,
        addr: &str,
    ) -> Result<(Arc<Client>, mpsc::Receiver<Income>), ClientError> {
        let mut stream = TcpStream::connect(addr).await?;
        sign_up(&mut stream, &identity).await?;
        info!(peer = %identity.peer_id().short(), router = addr, "authenticated to router");

        let (read_half, write_half) = stream.into_split();
        let client = Arc::new(Client {
            identity,
            writer: Mutex::new(write_half),
            pending: Arc::new(DashMap::new()),
            request_timeout: parking_lot::RwLock::new(DEFAULT_REQUEST_TIMEOUT),
            closed: Arc::new(AtomicBool::new(false)),
        });

        let (income_tx, income_rx) = mpsc::channel(INCOME_QUEUE_DEPTH);
        tokio::spawn(read_loop(
            read_half,
            income_tx,
            client.pending.clone(),
            client.closed.clone(),
        ));

        Ok((client, income_rx))
    }

    /// Our own peer id (the public signing key).
    pub fn local_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// Adjust the per-request reply timeout.
    pub fn set_request_timeout(&self, timeout: Duration) {
        *self.request_timeout.write() = timeout;
    }

    /// Send `payload` to `recipient` through the router. The returned handle
    /// resolves with the router's reply, or times out.
    pub async fn send(
        &self,
        recipient: PeerId,
        payload: &[u8],
    ) -> Result<PendingReply, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }

        let mut id = [0u8; REQUEST_ID_SIZE];
        getrandom::getrandom(&mut id)
            .map_err(|e| WireError::Protocol(format!("request id generation failed: {e}")))?;
        let request_id = RequestId(id);

        let (tx, rx) = oneshot::channel();
        // Register before writing so the reply cannot race the slot.
        self.pending.insert(request_id, tx);

        let reclaim = self.pending.clone();
        let timeout = *self.request_timeout.read();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Dropping the sender wakes the waiter with a timeout.
            reclaim.remove(&request_id);
        });

        {
            let mut w = self.writer.lock().await;
            if let Err(e) = write_peer_message(&mut *w, &request_id, &recipient, payload).await {
                drop(w);
                self.pending.remove(&request_id);
                return Err(e.into());
            }
        }

        Ok(PendingReply {
            request_id,
            rx,
            closed: self.closed.clone(),
        })
    }

    /// Shut down the connection. Outstanding waiters resolve `Closed`.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut w = self.writer.lock().await;
        let _ = w.shutdown().await;
        self.pending.clear();
    }
}

/// Mirror of the router's auth step: announce our key, sign its challenge.
async fn sign_up(stream: &mut TcpStream, identity: &Identity) -> Result<(), ClientError> {
    use tokio::io::AsyncReadExt;

    stream.write_all(identity.peer_id().as_bytes()).await?;

    let mut challenge = [0u8; CHALLENGE_SIZE];
    stream.read_exact(&mut challenge).await?;

    let sig = identity.sign(&challenge);
    stream.write_all(&sig).await?;
    Ok(())
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    income_tx: mpsc::Sender<Income>,
    pending: Arc<DashMap<RequestId, oneshot::Sender<ServerMessage>>>,
    closed: Arc<AtomicBool>,
) {
    loop {
        let msg = match read_server_message(&mut read_half).await {
            Ok(msg) => msg,
            Err(WireError::Closed) => {
                debug!("router connection closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "malformed router frame, tearing down connection");
                break;
            }
        };

        match msg.msg_type {
            ServerMsgType::Income => {
                let income = Income {
                    request_id: msg.request_id,
                    sender: msg.sender_id,
                    payload: msg.payload,
                };
                if income_tx.send(income).await.is_err() {
                    // Consumer gone; nothing left to deliver to.
                    break;
                }
            }
            _ => {
                if let Some((_, tx)) = pending.remove(&msg.request_id) {
                    let _ = tx.send(msg);
                }
                // A reply with no waiter raced its timeout; drop it.
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Wake every outstanding waiter with the closed signal.
    pending.clear();
}
