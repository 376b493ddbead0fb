//! The connector proper: inbound signaling dispatch, outgoing and incoming
//! connection attempts, and the sealed application channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use sendy_crypto::{open, seal, verify_signature, CryptoError, Identity};
use sendy_proto::frame::ServerMsgType;
use sendy_proto::{PeerId, SealedEnvelope, SignedEnvelope, Signaling, MIN_SEALED_LEN};
use sendy_router::{Client, ClientError, Income};

use crate::events::{Event, SecurityAlert};
use crate::media::{DataChannel, MediaConnection, MediaError, MediaProvider};
use crate::rate::OfferWindow;

/// Capacity of the event queue handed to the application.
const EVENT_QUEUE_DEPTH: usize = 100;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("peer is blocked")]
    Blocked,
    #[error("connection already exists")]
    AlreadyConnected,
    #[error("connection attempt already in flight")]
    ConnectInProgress,
    #[error("no active session with peer")]
    NoSession,
    #[error("data channel is not open")]
    ChannelNotOpen,
    #[error("no encryption key for peer, key exchange required first")]
    NoEncryptionKey,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("offer rejected by router: {0:?}")]
    Rejected(ServerMsgType),
    /// The attempt was superseded by the tiebreak; not an error to report.
    #[error("attempt cancelled")]
    Cancelled,
    #[error("router client: {0}")]
    Router(#[from] ClientError),
    #[error("media transport: {0}")]
    Media(#[from] MediaError),
    #[error("crypto: {0}")]
    Crypto(#[from] CryptoError),
}

/// Timeouts and limits for the connector. Defaults follow the protocol;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub max_offers_per_minute: u32,
    pub offer_window: Duration,
    pub ice_gathering_timeout: Duration,
    pub key_exchange_timeout: Duration,
    pub key_poll_interval: Duration,
    pub offer_ack_timeout: Duration,
    pub answer_timeout: Duration,
    pub channel_open_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            max_offers_per_minute: 10,
            offer_window: Duration::from_secs(60),
            ice_gathering_timeout: Duration::from_secs(5),
            key_exchange_timeout: Duration::from_secs(5),
            key_poll_interval: Duration::from_millis(100),
            offer_ack_timeout: Duration::from_secs(10),
            answer_timeout: Duration::from_secs(30),
            channel_open_timeout: Duration::from_secs(30),
        }
    }
}

/// What the TOFU check concluded about an announced encryption key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeyObservation {
    /// First key seen for this peer; now pinned.
    First,
    /// Matches the pinned key.
    Known,
    /// Differs from the pinned key. Attack indicator.
    Mismatch,
}

/// A live session: the media connection and, once open, its channel.
struct Session {
    peer: PeerId,
    seq: u64,
    conn: Arc<dyn MediaConnection>,
    channel: Mutex<Option<Arc<dyn DataChannel>>>,
}

/// Everything the connector tracks about one remote peer.
#[derive(Default)]
struct PeerState {
    /// Pinned remote encryption key (trust on first use).
    enc_key: Option<[u8; 32]>,
    /// Slot awaiting the remote answer while our offer is in flight.
    /// Dropping the sender cancels the outgoing attempt.
    pending_offer: Option<oneshot::Sender<String>>,
    session: Option<Arc<Session>>,
    offer_window: OfferWindow,
}

struct PeerEntry {
    state: Mutex<PeerState>,
}

/// Multiplexes per-peer signaling state machines over one router client.
pub struct Connector {
    client: Arc<Client>,
    provider: Arc<dyn MediaProvider>,
    identity: Arc<Identity>,
    config: ConnectorConfig,
    local_id: PeerId,
    peers: DashMap<PeerId, Arc<PeerEntry>>,
    blocklist: DashSet<PeerId>,
    events: mpsc::Sender<Event>,
    session_seq: AtomicU64,
    /// Handle to ourselves for spawning per-attempt and per-session tasks.
    weak: Weak<Connector>,
}

impl Connector {
    /// Build the connector and start consuming the router's inbound queue.
    /// Returns the connector and its event stream.
    pub fn new(
        client: Arc<Client>,
        income: mpsc::Receiver<Income>,
        provider: Arc<dyn MediaProvider>,
        identity: Arc<Identity>,
        config: ConnectorConfig,
    ) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let local_id = identity.peer_id();
        info!(peer = %local_id.short(), "connector starting");

        let connector = Arc::new_cyclic(|weak| Self {
            client,
            provider,
            identity,
            config,
            local_id,
            peers: DashMap::new(),
            blocklist: DashSet::new(),
            events: events_tx,
            session_seq: AtomicU64::new(0),
            weak: weak.clone(),
        });

        let consumer = connector.clone();
        tokio::spawn(async move { consumer.run_income(income).await });

        (connector, events_rx)
    }

    /// Our own peer id.
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Initiate a connection to `peer`. Validation is synchronous; the
    /// attempt itself runs on its own task and reports through events.
    pub fn connect(&self, peer: PeerId) -> Result<(), ConnectorError> {
        if self.blocklist.contains(&peer) {
            warn!(peer = %peer.short(), "refusing to connect to blocked peer");
            return Err(ConnectorError::Blocked);
        }
        {
            let entry = self.entry(peer);
            let st = entry.state.lock();
            if st.session.is_some() {
                return Err(ConnectorError::AlreadyConnected);
            }
            if st.pending_offer.is_some() {
                return Err(ConnectorError::ConnectInProgress);
            }
        }

        debug!(peer = %peer.short(), "starting outgoing connection attempt");
        let Some(this) = self.weak.upgrade() else {
            return Ok(());
        };
        tokio::spawn(async move {
            if let Err(e) = this.run_outgoing(peer).await {
                match e {
                    // Superseded by the tiebreak: the inbound path owns the
                    // session now, stay silent.
                    ConnectorError::Cancelled => {
                        debug!(peer = %peer.short(), "outgoing attempt cancelled by tiebreak")
                    }
                    e => {
                        warn!(peer = %peer.short(), error = %e, "outgoing attempt failed");
                        this.emit(Event::ConnectionFailed {
                            peer,
                            reason: e.to_string(),
                        })
                        .await;
                    }
                }
            }
        });
        Ok(())
    }

    /// Send an application message over the established session. Fails
    /// synchronously when the channel is not open.
    pub async fn send_to(&self, peer: PeerId, data: &[u8]) -> Result<(), ConnectorError> {
        let session = {
            let entry = self.entry(peer);
            let st = entry.state.lock();
            st.session.clone()
        }
        .ok_or(ConnectorError::NoSession)?;

        let channel = session
            .channel
            .lock()
            .clone()
            .ok_or(ConnectorError::ChannelNotOpen)?;
        if !channel.is_open() {
            return Err(ConnectorError::ChannelNotOpen);
        }

        let key = self.peer_key(peer).ok_or(ConnectorError::NoEncryptionKey)?;
        let sealed = seal(data, &key, self.identity.enc_secret())?;
        channel.send(&sealed).await.map_err(|e| match e {
            MediaError::NotOpen => ConnectorError::ChannelNotOpen,
            other => ConnectorError::Media(other),
        })
    }

    /// Tear down the session with `peer`, if any.
    pub async fn disconnect(&self, peer: PeerId) -> Result<(), ConnectorError> {
        let session = {
            let entry = self.entry(peer);
            let mut st = entry.state.lock();
            st.session.take()
        }
        .ok_or(ConnectorError::NoSession)?;

        info!(peer = %peer.short(), "closing session");
        let channel = session.channel.lock().clone();
        if let Some(channel) = channel {
            channel.close().await;
        }
        session.conn.close().await;
        Ok(())
    }

    /// Tear down every session.
    pub async fn disconnect_all(&self) {
        let peers = self.active_peers();
        for peer in peers {
            let _ = self.disconnect(peer).await;
        }
    }

    /// Peers with a registered session.
    pub fn active_peers(&self) -> Vec<PeerId> {
        self.peers
            .iter()
            .filter(|entry| entry.value().state.lock().session.is_some())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Block `peer`: drop its inbound signaling without response, refuse
    /// outbound connects, and tear down any live session. Local only.
    pub async fn block(&self, peer: PeerId) {
        info!(peer = %peer.short(), "blocking peer");
        self.blocklist.insert(peer);
        // Cancel any in-flight outgoing attempt as well.
        {
            let entry = self.entry(peer);
            entry.state.lock().pending_offer = None;
        }
        let _ = self.disconnect(peer).await;
    }

    pub fn unblock(&self, peer: PeerId) {
        info!(peer = %peer.short(), "unblocking peer");
        self.blocklist.remove(&peer);
    }

    pub fn is_blocked(&self, peer: &PeerId) -> bool {
        self.blocklist.contains(peer)
    }

    pub fn blocked_peers(&self) -> Vec<PeerId> {
        self.blocklist.iter().map(|p| *p).collect()
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn run_income(self: Arc<Self>, mut income: mpsc::Receiver<Income>) {
        while let Some(msg) = income.recv().await {
            self.handle_income(msg).await;
        }
        debug!("router inbound queue closed, connector dispatch stopping");
    }

    async fn handle_income(&self, msg: Income) {
        let sender = msg.sender;

        // Blocked peers get no processing, no reply, no state change.
        if self.blocklist.contains(&sender) {
            debug!(peer = %sender.short(), "dropping signaling from blocked peer");
            return;
        }

        let signed = match SignedEnvelope::decode(&msg.payload) {
            Ok(signed) => signed,
            Err(e) => {
                warn!(peer = %sender.short(), error = %e, "malformed signed envelope");
                self.emit(Event::Error {
                    peer: sender,
                    reason: format!("invalid message format: {e}"),
                })
                .await;
                return;
            }
        };

        // No state is touched before the signature checks out; the sender's
        // peer id is its verification key.
        if verify_signature(&sender, &signed.payload, &signed.signature_bytes()).is_err() {
            error!(peer = %sender.short(), "invalid signature on signaling message");
            self.emit(Event::SecurityEvent {
                peer: sender,
                alert: SecurityAlert::InvalidSignature,
            })
            .await;
            return;
        }

        let sealed = match SealedEnvelope::decode(&signed.payload) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(peer = %sender.short(), error = %e, "malformed sealed envelope");
                self.emit(Event::Error {
                    peer: sender,
                    reason: format!("invalid envelope: {e}"),
                })
                .await;
                return;
            }
        };

        let announced_key = sealed.sender_key();
        let observation = self.observe_key(sender, announced_key);
        if observation == KeyObservation::Mismatch {
            error!(
                peer = %sender.short(),
                announced = %hex::encode(&announced_key[..8]),
                "peer encryption key changed, dropping message"
            );
            self.emit(Event::SecurityEvent {
                peer: sender,
                alert: SecurityAlert::KeyMismatch,
            })
            .await;
            return;
        }

        if sealed.is_key_exchange() {
            debug!(peer = %sender.short(), "key exchange received");
            // Reply only on first sight of the key, so two peers cannot
            // ping-pong key exchanges forever.
            if observation == KeyObservation::First {
                if let Err(e) = self.send_key_exchange(sender).await {
                    warn!(peer = %sender.short(), error = %e, "failed to answer key exchange");
                }
            }
            return;
        }

        if sealed.encrypted_data.len() < MIN_SEALED_LEN {
            error!(
                peer = %sender.short(),
                len = sealed.encrypted_data.len(),
                "unencrypted non-handshake envelope, dropping"
            );
            self.emit(Event::SecurityEvent {
                peer: sender,
                alert: SecurityAlert::ShortCiphertext,
            })
            .await;
            return;
        }

        let plaintext = match open(
            &sealed.encrypted_data,
            &announced_key,
            self.identity.enc_secret(),
        ) {
            Ok(p) => p,
            Err(e) => {
                warn!(peer = %sender.short(), error = %e, "failed to open signaling envelope");
                self.emit(Event::SecurityEvent {
                    peer: sender,
                    alert: SecurityAlert::DecryptionFailed,
                })
                .await;
                return;
            }
        };

        let signaling = match Signaling::decode(&plaintext) {
            Ok(s) => s,
            Err(e) => {
                self.emit(Event::Error {
                    peer: sender,
                    reason: format!("invalid signaling payload: {e}"),
                })
                .await;
                return;
            }
        };

        match signaling {
            Signaling::Answer { sdp } => {
                let slot = {
                    let entry = self.entry(sender);
                    let taken = entry.state.lock().pending_offer.take();
                    taken
                };
                match slot {
                    Some(tx) => {
                        let _ = tx.send(sdp);
                    }
                    // No offer in flight; stale or duplicate answer.
                    None => debug!(peer = %sender.short(), "answer without pending offer, dropping"),
                }
            }
            Signaling::Offer { sdp } => self.handle_offer(sender, sdp).await,
        }
    }

    async fn handle_offer(&self, sender: PeerId, sdp: String) {
        // Rate limit at classification time, before any session work.
        {
            let entry = self.entry(sender);
            let mut st = entry.state.lock();
            if !st
                .offer_window
                .allow(self.config.max_offers_per_minute, self.config.offer_window)
            {
                drop(st);
                warn!(peer = %sender.short(), "offer rate limit exceeded, dropping");
                return;
            }
        }

        if self.blocklist.contains(&sender) {
            return;
        }

        // Simultaneous connect: both sides hold an offer for each other.
        // The lexicographically larger id accepts the incoming offer and
        // cancels its own attempt; the smaller one lets its attempt run.
        {
            let entry = self.entry(sender);
            let mut st = entry.state.lock();
            if st.pending_offer.is_some() {
                if self.local_id > sender {
                    debug!(peer = %sender.short(), "tiebreak: accepting incoming offer");
                    // Dropping the slot terminates our outgoing task.
                    st.pending_offer = None;
                } else {
                    debug!(peer = %sender.short(), "tiebreak: ignoring incoming offer");
                    return;
                }
            }
        }

        let Some(this) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = this.run_incoming(sender, sdp).await {
                warn!(peer = %sender.short(), error = %e, "incoming attempt failed");
                this.emit(Event::ConnectionFailed {
                    peer: sender,
                    reason: e.to_string(),
                })
                .await;
            }
        });
    }

    // ------------------------------------------------------------------
    // Outgoing connect
    // ------------------------------------------------------------------

    async fn run_outgoing(&self, peer: PeerId) -> Result<(), ConnectorError> {
        let conn = self.provider.new_connection().await?;
        match self.drive_outgoing(peer, conn.clone()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn drive_outgoing(
        &self,
        peer: PeerId,
        conn: Arc<dyn MediaConnection>,
    ) -> Result<(), ConnectorError> {
        let channel = conn.open_channel().await?;
        let offer_sdp = conn.create_offer().await?;
        timeout(self.config.ice_gathering_timeout, conn.wait_ice_gathering())
            .await
            .map_err(|_| ConnectorError::Timeout("ICE gathering"))??;

        // Key exchange first; the offer itself travels encrypted.
        self.send_key_exchange(peer).await?;
        let peer_key = self.wait_peer_key(peer).await?;

        let signed = self.sign_sealed(peer_key, &Signaling::Offer { sdp: offer_sdp })?;

        // Install the answer slot before sending so the router's reply and
        // the peer's answer can race without loss.
        let answer_rx = {
            let entry = self.entry(peer);
            let mut st = entry.state.lock();
            if st.session.is_some() {
                return Err(ConnectorError::AlreadyConnected);
            }
            let (tx, rx) = oneshot::channel();
            st.pending_offer = Some(tx);
            rx
        };

        debug!(peer = %peer.short(), "sending signed encrypted offer");
        let reply = match self.client.send(peer, &signed).await {
            Ok(reply) => reply,
            Err(e) => {
                self.clear_pending(peer);
                return Err(e.into());
            }
        };

        match timeout(self.config.offer_ack_timeout, reply.wait()).await {
            Ok(Ok(resp)) if resp.msg_type == ServerMsgType::Success => {}
            Ok(Ok(resp)) => {
                self.clear_pending(peer);
                return Err(ConnectorError::Rejected(resp.msg_type));
            }
            Ok(Err(e)) => {
                self.clear_pending(peer);
                return Err(e.into());
            }
            Err(_) => {
                self.clear_pending(peer);
                return Err(ConnectorError::Timeout("offer acknowledgement"));
            }
        }

        let answer_sdp = match timeout(self.config.answer_timeout, answer_rx).await {
            Ok(Ok(sdp)) => sdp,
            // Slot dropped by the tiebreak: the inbound path takes over.
            Ok(Err(_)) => return Err(ConnectorError::Cancelled),
            Err(_) => {
                self.clear_pending(peer);
                return Err(ConnectorError::Timeout("answer"));
            }
        };

        conn.accept_answer(&answer_sdp).await?;
        self.register_session(peer, conn, Some(channel));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Incoming offer
    // ------------------------------------------------------------------

    async fn run_incoming(&self, peer: PeerId, offer_sdp: String) -> Result<(), ConnectorError> {
        {
            let entry = self.entry(peer);
            let st = entry.state.lock();
            // A session or an attempt the tiebreak let through already owns
            // this pairing; drop the duplicate quietly.
            if st.session.is_some() || st.pending_offer.is_some() {
                return Ok(());
            }
        }

        let conn = self.provider.new_connection().await?;
        match self.drive_incoming(peer, conn.clone(), offer_sdp).await {
            Ok(()) => Ok(()),
            Err(e) => {
                conn.close().await;
                Err(e)
            }
        }
    }

    async fn drive_incoming(
        &self,
        peer: PeerId,
        conn: Arc<dyn MediaConnection>,
        offer_sdp: String,
    ) -> Result<(), ConnectorError> {
        let answer_sdp = conn.create_answer(&offer_sdp).await?;
        timeout(self.config.ice_gathering_timeout, conn.wait_ice_gathering())
            .await
            .map_err(|_| ConnectorError::Timeout("ICE gathering"))??;

        // The offer decrypted, so we normally know the key already; the
        // exception is an offer that raced ahead of the handshake.
        let peer_key = match self.peer_key(peer) {
            Some(key) => key,
            None => {
                warn!(peer = %peer.short(), "no peer key while answering, sending key exchange");
                self.send_key_exchange(peer).await?;
                self.wait_peer_key(peer).await?
            }
        };

        let signed = self.sign_sealed(peer_key, &Signaling::Answer { sdp: answer_sdp })?;

        debug!(peer = %peer.short(), "sending signed encrypted answer");
        let reply = self.client.send(peer, &signed).await?;
        match timeout(self.config.offer_ack_timeout, reply.wait()).await {
            Ok(Ok(resp)) if resp.msg_type == ServerMsgType::Success => {}
            Ok(Ok(resp)) => return Err(ConnectorError::Rejected(resp.msg_type)),
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ConnectorError::Timeout("answer acknowledgement")),
        }

        // The remote side created the data channel; the session task adopts
        // it when it arrives.
        self.register_session(peer, conn, None);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    fn register_session(
        &self,
        peer: PeerId,
        conn: Arc<dyn MediaConnection>,
        channel: Option<Arc<dyn DataChannel>>,
    ) {
        let seq = self.session_seq.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            peer,
            seq,
            conn: conn.clone(),
            channel: Mutex::new(channel),
        });

        let installed = {
            let entry = self.entry(peer);
            let mut st = entry.state.lock();
            if st.session.is_some() {
                false
            } else {
                st.session = Some(session.clone());
                true
            }
        };

        if !installed {
            // Lost a registration race; exactly one session per pair.
            debug!(peer = %peer.short(), "session already registered, discarding duplicate");
            tokio::spawn(async move { conn.close().await });
            return;
        }

        let Some(this) = self.weak.upgrade() else {
            return;
        };
        tokio::spawn(async move { this.session_task(session).await });
    }

    async fn session_task(self: Arc<Self>, session: Arc<Session>) {
        let peer = session.peer;

        let channel = {
            let existing = session.channel.lock().clone();
            match existing {
                Some(channel) => channel,
                None => {
                    match timeout(self.config.channel_open_timeout, session.conn.accept_channel())
                        .await
                    {
                        Ok(Ok(channel)) => channel,
                        _ => {
                            self.fail_session(&session, "data channel never arrived").await;
                            return;
                        }
                    }
                }
            }
        };

        match timeout(self.config.channel_open_timeout, channel.wait_open()).await {
            Ok(Ok(())) => {}
            _ => {
                self.fail_session(&session, "data channel failed to open").await;
                return;
            }
        }

        *session.channel.lock() = Some(channel.clone());
        info!(peer = %peer.short(), "session established");
        self.emit(Event::Connected { peer }).await;

        while let Some(ciphertext) = channel.recv().await {
            match self.open_channel_message(peer, &ciphertext) {
                Ok(data) => {
                    self.emit(Event::DataReceived { peer, data }).await;
                }
                Err(e) => {
                    warn!(peer = %peer.short(), error = %e, "failed to decrypt channel message");
                    self.emit(Event::Error {
                        peer,
                        reason: format!("decrypt data: {e}"),
                    })
                    .await;
                }
            }
        }

        self.remove_session(peer, session.seq);
        session.conn.close().await;
        info!(peer = %peer.short(), "session closed");
        self.emit(Event::Disconnected { peer }).await;
    }

    async fn fail_session(&self, session: &Arc<Session>, reason: &str) {
        self.remove_session(session.peer, session.seq);
        session.conn.close().await;
        self.emit(Event::ConnectionFailed {
            peer: session.peer,
            reason: reason.to_string(),
        })
        .await;
    }

    fn remove_session(&self, peer: PeerId, seq: u64) {
        let entry = self.entry(peer);
        let mut st = entry.state.lock();
        if st.session.as_ref().map(|s| s.seq) == Some(seq) {
            st.session = None;
        }
    }

    fn open_channel_message(&self, peer: PeerId, ciphertext: &[u8]) -> Result<Vec<u8>, ConnectorError> {
        let key = self.peer_key(peer).ok_or(ConnectorError::NoEncryptionKey)?;
        Ok(open(ciphertext, &key, self.identity.enc_secret())?)
    }

    // ------------------------------------------------------------------
    // Keys and envelopes
    // ------------------------------------------------------------------

    fn entry(&self, peer: PeerId) -> Arc<PeerEntry> {
        self.peers
            .entry(peer)
            .or_insert_with(|| {
                Arc::new(PeerEntry {
                    state: Mutex::new(PeerState::default()),
                })
            })
            .clone()
    }

    fn peer_key(&self, peer: PeerId) -> Option<[u8; 32]> {
        self.peers
            .get(&peer)
            .and_then(|entry| entry.value().state.lock().enc_key)
    }

    fn observe_key(&self, peer: PeerId, key: [u8; 32]) -> KeyObservation {
        let entry = self.entry(peer);
        let mut st = entry.state.lock();
        match st.enc_key {
            None => {
                st.enc_key = Some(key);
                info!(
                    peer = %peer.short(),
                    key = %hex::encode(&key[..8]),
                    "pinned peer encryption key"
                );
                KeyObservation::First
            }
            Some(pinned) if pinned == key => KeyObservation::Known,
            Some(_) => KeyObservation::Mismatch,
        }
    }

    fn clear_pending(&self, peer: PeerId) {
        let entry = self.entry(peer);
        entry.state.lock().pending_offer = None;
    }

    /// Seal `payload` to `peer_key`, wrap in a sealed envelope, sign the
    /// whole envelope with our identity key.
    fn sign_sealed(
        &self,
        peer_key: [u8; 32],
        payload: &Signaling,
    ) -> Result<Vec<u8>, ConnectorError> {
        let sealed = seal(&payload.encode(), &peer_key, self.identity.enc_secret())?;
        let envelope = SealedEnvelope::new(self.identity.enc_public(), sealed).encode();
        let signature = self.identity.sign(&envelope);
        Ok(SignedEnvelope::new(envelope, signature).encode())
    }

    /// Announce our encryption key: a signed envelope carrying the literal
    /// handshake marker. The router's reply is not awaited.
    async fn send_key_exchange(&self, peer: PeerId) -> Result<(), ConnectorError> {
        let envelope = SealedEnvelope::key_exchange(self.identity.enc_public()).encode();
        let signature = self.identity.sign(&envelope);
        let signed = SignedEnvelope::new(envelope, signature).encode();
        debug!(peer = %peer.short(), "sending key exchange");
        let _ = self.client.send(peer, &signed).await?;
        Ok(())
    }

    /// Poll until the peer's encryption key shows up, bounded by the key
    /// exchange timeout.
    async fn wait_peer_key(&self, peer: PeerId) -> Result<[u8; 32], ConnectorError> {
        let deadline = Instant::now() + self.config.key_exchange_timeout;
        loop {
            if let Some(key) = self.peer_key(peer) {
                return Ok(key);
            }
            if Instant::now() >= deadline {
                return Err(ConnectorError::Timeout("peer key exchange"));
            }
            tokio::time::sleep(self.config.key_poll_interval).await;
        }
    }

    async fn emit(&self, event: Event) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}
