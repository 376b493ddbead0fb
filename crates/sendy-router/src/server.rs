//! The router server: accept, authenticate, forward.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use sendy_crypto::verify_signature;
use sendy_proto::frame::{
    read_peer_header, write_income_header, write_server_reply, ServerMsgType,
};
use sendy_proto::{PeerId, RequestId, WireError, CHALLENGE_SIZE, PEER_ID_SIZE, SIGNATURE_SIZE};

use crate::config::RouterConfig;

/// Copy window used to stream payloads from sender to recipient.
const COPY_WINDOW: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("accept failed: {0}")]
    Accept(std::io::Error),
}

/// A live, authenticated connection in the registry.
struct RegisteredPeer {
    id: PeerId,
    /// Distinguishes this connection from a later one under the same id,
    /// so disconnect cleanup cannot remove a successor's entry.
    seq: u64,
    /// All writes to this connection (deliveries and replies) serialize here.
    writer: Mutex<OwnedWriteHalf>,
    /// Raised when a newer connection for the same id displaces this one.
    evicted: Notify,
}

type Registry = Arc<DashMap<PeerId, Arc<RegisteredPeer>>>;

/// The router server. Holds the listener and the peer registry; `run`
/// serves until the listener errors.
pub struct Router {
    config: RouterConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    peers: Registry,
    conn_seq: AtomicU64,
}

impl Router {
    /// Bind the listen socket. Serving starts with [`Router::run`].
    pub async fn bind(config: RouterConfig) -> Result<Self, RouterError> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| RouterError::Bind {
                addr: config.listen_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(RouterError::Accept)?;
        Ok(Self {
            config,
            listener,
            local_addr,
            peers: Arc::new(DashMap::new()),
            conn_seq: AtomicU64::new(0),
        })
    }

    /// The bound address; useful when listening on an ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. One task per connection; runs until accept fails.
    pub async fn run(self) -> Result<(), RouterError> {
        info!(address = %self.local_addr, "router listening");
        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    return Err(RouterError::Accept(e));
                }
            };
            debug!(remote = %remote, "accepted connection");

            let peers = self.peers.clone();
            let config = self.config.clone();
            let seq = self.conn_seq.fetch_add(1, Ordering::Relaxed);
            tokio::spawn(async move {
                handle_conn(stream, remote, peers, config, seq).await;
            });
        }
    }
}

async fn handle_conn(
    mut stream: TcpStream,
    remote: SocketAddr,
    peers: Registry,
    config: RouterConfig,
    seq: u64,
) {
    let id = match timeout(config.auth_timeout, authenticate(&mut stream)).await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            warn!(remote = %remote, error = %e, "authentication failed");
            return;
        }
        Err(_) => {
            warn!(remote = %remote, "authentication timed out");
            return;
        }
    };
    info!(peer = %id.short(), remote = %remote, "peer authenticated");

    let (mut read_half, write_half) = stream.into_split();
    let me = Arc::new(RegisteredPeer {
        id,
        seq,
        writer: Mutex::new(write_half),
        evicted: Notify::new(),
    });

    if let Some(old) = peers.insert(id, me.clone()) {
        info!(peer = %id.short(), "evicting previous connection for re-registered peer");
        old.evicted.notify_one();
        tokio::spawn(async move {
            let mut w = old.writer.lock().await;
            let _ = w.shutdown().await;
        });
    }

    let mut window = vec![0u8; COPY_WINDOW];
    loop {
        tokio::select! {
            _ = me.evicted.notified() => {
                debug!(peer = %id.short(), "connection superseded");
                break;
            }
            res = handle_message(&me, &mut read_half, &peers, &mut window, config.write_timeout) => {
                match res {
                    Ok(()) => {}
                    Err(WireError::Closed) => {
                        info!(peer = %id.short(), "peer disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %id.short(), error = %e, "dropping connection");
                        break;
                    }
                }
            }
        }
    }

    peers.remove_if(&id, |_, p| p.seq == seq);
    debug!(peer = %id.short(), "peer removed from registry");
}

/// Challenge-response handshake: claimed key, random challenge, detached
/// signature over the challenge.
async fn authenticate(stream: &mut TcpStream) -> Result<PeerId, WireError> {
    let mut pubkey = [0u8; PEER_ID_SIZE];
    stream.read_exact(&mut pubkey).await?;

    let mut challenge = [0u8; CHALLENGE_SIZE];
    getrandom::getrandom(&mut challenge)
        .map_err(|e| WireError::Protocol(format!("challenge generation failed: {e}")))?;
    stream.write_all(&challenge).await?;

    let mut sig = [0u8; SIGNATURE_SIZE];
    stream.read_exact(&mut sig).await?;

    let id = PeerId(pubkey);
    verify_signature(&id, &challenge, &sig)
        .map_err(|_| WireError::Protocol("challenge signature invalid".into()))?;
    Ok(id)
}

/// Read one frame from `sender` and route it. Returns `Err` only when the
/// sender's connection must be dropped; delivery failures are reported to
/// the sender with an `Error` reply and the loop continues.
async fn handle_message(
    sender: &Arc<RegisteredPeer>,
    read_half: &mut OwnedReadHalf,
    peers: &Registry,
    window: &mut [u8],
    write_timeout: Duration,
) -> Result<(), WireError> {
    let header = read_peer_header(read_half).await?;
    debug!(
        from = %sender.id.short(),
        to = %header.recipient.short(),
        payload_len = header.payload_len,
        "routing message"
    );

    // Clone out of the map guard before any await point.
    let recipient = peers.get(&header.recipient).map(|entry| entry.value().clone());

    let Some(recipient) = recipient else {
        debug!(
            to = %header.recipient.short(),
            from = %sender.id.short(),
            "recipient not found"
        );
        drain_payload(read_half, header.payload_len, window).await?;
        return reply(sender, ServerMsgType::NotFound, &header.request_id).await;
    };

    // Deliver under the recipient's write lock so its frames stay contiguous.
    let delivered = {
        let mut dest = recipient.writer.lock().await;
        deliver(
            read_half,
            &mut dest,
            sender.id,
            &header.request_id,
            header.payload_len,
            window,
            write_timeout,
        )
        .await
    };

    match delivered {
        Ok(()) => {
            debug!(
                from = %sender.id.short(),
                to = %recipient.id.short(),
                payload_len = header.payload_len,
                "message delivered"
            );
            reply(sender, ServerMsgType::Success, &header.request_id).await
        }
        Err(DeliverError::Recipient { consumed, source }) => {
            warn!(
                from = %sender.id.short(),
                to = %recipient.id.short(),
                error = %source,
                "delivery failed"
            );
            // The sender's frame must still be consumed in full before the
            // connection can carry another one.
            drain_payload(read_half, header.payload_len - consumed, window).await?;
            reply(sender, ServerMsgType::Error, &header.request_id).await
        }
        Err(DeliverError::Sender(e)) => {
            // Short payload read: the sender's stream is broken.
            let _ = reply(sender, ServerMsgType::Error, &header.request_id).await;
            Err(e)
        }
    }
}

enum DeliverError {
    /// The recipient's write side failed after `consumed` payload bytes had
    /// been read off the sender.
    Recipient { consumed: usize, source: WireError },
    Sender(WireError),
}

fn write_deadline_error() -> WireError {
    WireError::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        "write deadline exceeded",
    ))
}

async fn deliver(
    read_half: &mut OwnedReadHalf,
    dest: &mut OwnedWriteHalf,
    sender_id: PeerId,
    request_id: &RequestId,
    payload_len: usize,
    window: &mut [u8],
    write_timeout: Duration,
) -> Result<(), DeliverError> {
    match timeout(
        write_timeout,
        write_income_header(dest, request_id, &sender_id, payload_len),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(source)) => return Err(DeliverError::Recipient { consumed: 0, source }),
        Err(_) => {
            return Err(DeliverError::Recipient {
                consumed: 0,
                source: write_deadline_error(),
            })
        }
    }

    // Stream the payload through the window: one pass over the bytes, no
    // per-message allocation.
    let mut remaining = payload_len;
    while remaining > 0 {
        let chunk = remaining.min(window.len());
        read_half
            .read_exact(&mut window[..chunk])
            .await
            .map_err(|e| DeliverError::Sender(e.into()))?;
        let consumed = payload_len - remaining + chunk;

        match timeout(write_timeout, dest.write_all(&window[..chunk])).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(DeliverError::Recipient {
                    consumed,
                    source: e.into(),
                })
            }
            Err(_) => {
                return Err(DeliverError::Recipient {
                    consumed,
                    source: write_deadline_error(),
                })
            }
        }

        remaining -= chunk;
    }
    Ok(())
}

/// Discard `len` payload bytes from the sender through the copy window.
async fn drain_payload(
    read_half: &mut OwnedReadHalf,
    len: usize,
    window: &mut [u8],
) -> Result<(), WireError> {
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(window.len());
        read_half.read_exact(&mut window[..chunk]).await?;
        remaining -= chunk;
    }
    Ok(())
}

async fn reply(
    sender: &Arc<RegisteredPeer>,
    msg_type: ServerMsgType,
    request_id: &RequestId,
) -> Result<(), WireError> {
    let mut w = sender.writer.lock().await;
    write_server_reply(&mut *w, msg_type, request_id).await
}
