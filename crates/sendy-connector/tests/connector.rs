//! End-to-end connector tests: a real router on an ephemeral port plus the
//! in-process media hub.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use sendy_connector::{
    Connector, ConnectorConfig, ConnectorError, DataChannel, Event, MediaConnection, MediaError,
    MediaProvider, MemoryMediaHub, SecurityAlert,
};
use sendy_crypto::{seal, Identity};
use sendy_proto::{PeerId, SealedEnvelope, SignedEnvelope, Signaling};
use sendy_router::{Client, Router, RouterConfig};

struct TestPeer {
    connector: Arc<Connector>,
    events: mpsc::Receiver<Event>,
    identity: Arc<Identity>,
}

impl TestPeer {
    fn id(&self) -> PeerId {
        self.connector.local_id()
    }
}

async fn spawn_router() -> std::net::SocketAddr {
    let config = RouterConfig::default().with_listen_addr("127.0.0.1:0".parse().unwrap());
    let router = Router::bind(config).await.unwrap();
    let addr = router.local_addr();
    tokio::spawn(async move {
        let _ = router.run().await;
    });
    addr
}

fn fast_config() -> ConnectorConfig {
    ConnectorConfig {
        key_exchange_timeout: Duration::from_secs(2),
        key_poll_interval: Duration::from_millis(20),
        answer_timeout: Duration::from_secs(5),
        offer_ack_timeout: Duration::from_secs(5),
        channel_open_timeout: Duration::from_secs(5),
        ..ConnectorConfig::default()
    }
}

async fn make_peer(
    addr: std::net::SocketAddr,
    provider: Arc<dyn MediaProvider>,
    config: ConnectorConfig,
) -> TestPeer {
    let identity = Arc::new(Identity::generate());
    let (client, income) = Client::dial(identity.clone(), &addr.to_string()).await.unwrap();
    let (connector, events) = Connector::new(client, income, provider, identity.clone(), config);
    TestPeer {
        connector,
        events,
        identity,
    }
}

/// Wait until `pred` matches an event, failing the test on timeout.
async fn wait_event<F>(rx: &mut mpsc::Receiver<Event>, what: &str, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    timeout(Duration::from_secs(10), async {
        loop {
            let ev = rx.recv().await.expect("event stream closed");
            if pred(&ev) {
                return ev;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

#[tokio::test]
async fn establish_and_echo() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut a = make_peer(addr, hub.provider(), fast_config()).await;
    let mut b = make_peer(addr, hub.provider(), fast_config()).await;

    a.connector.connect(b.id()).unwrap();

    let b_id = b.id();
    let a_id = a.id();
    wait_event(&mut a.events, "A connected", |e| {
        matches!(e, Event::Connected { peer } if *peer == b_id)
    })
    .await;
    wait_event(&mut b.events, "B connected", |e| {
        matches!(e, Event::Connected { peer } if *peer == a_id)
    })
    .await;

    assert_eq!(a.connector.active_peers(), vec![b_id]);
    assert_eq!(b.connector.active_peers(), vec![a_id]);

    a.connector.send_to(b_id, b"ping").await.unwrap();
    let ev = wait_event(&mut b.events, "B data", |e| matches!(e, Event::DataReceived { .. })).await;
    match ev {
        Event::DataReceived { peer, data } => {
            assert_eq!(peer, a_id);
            assert_eq!(data, b"ping");
        }
        other => panic!("unexpected event {other:?}"),
    }

    b.connector.send_to(a_id, b"pong").await.unwrap();
    let ev = wait_event(&mut a.events, "A data", |e| matches!(e, Event::DataReceived { .. })).await;
    match ev {
        Event::DataReceived { data, .. } => assert_eq!(data, b"pong"),
        other => panic!("unexpected event {other:?}"),
    }
}

// ---------------------------------------------------------------------
// Channel confidentiality: tap the media layer and verify no plaintext.
// ---------------------------------------------------------------------

type TrafficLog = Arc<parking_lot::Mutex<Vec<Vec<u8>>>>;

struct RecordingProvider {
    inner: Arc<dyn MediaProvider>,
    log: TrafficLog,
}

struct RecordingConnection {
    inner: Arc<dyn MediaConnection>,
    log: TrafficLog,
}

struct RecordingChannel {
    inner: Arc<dyn DataChannel>,
    log: TrafficLog,
}

#[async_trait]
impl MediaProvider for RecordingProvider {
    async fn new_connection(&self) -> Result<Arc<dyn MediaConnection>, MediaError> {
        Ok(Arc::new(RecordingConnection {
            inner: self.inner.new_connection().await?,
            log: self.log.clone(),
        }))
    }
}

#[async_trait]
impl MediaConnection for RecordingConnection {
    async fn create_offer(&self) -> Result<String, MediaError> {
        self.inner.create_offer().await
    }
    async fn create_answer(&self, offer: &str) -> Result<String, MediaError> {
        self.inner.create_answer(offer).await
    }
    async fn accept_answer(&self, answer: &str) -> Result<(), MediaError> {
        self.inner.accept_answer(answer).await
    }
    async fn wait_ice_gathering(&self) -> Result<(), MediaError> {
        self.inner.wait_ice_gathering().await
    }
    async fn open_channel(&self) -> Result<Arc<dyn DataChannel>, MediaError> {
        Ok(Arc::new(RecordingChannel {
            inner: self.inner.open_channel().await?,
            log: self.log.clone(),
        }))
    }
    async fn accept_channel(&self) -> Result<Arc<dyn DataChannel>, MediaError> {
        Ok(Arc::new(RecordingChannel {
            inner: self.inner.accept_channel().await?,
            log: self.log.clone(),
        }))
    }
    async fn close(&self) {
        self.inner.close().await
    }
}

#[async_trait]
impl DataChannel for RecordingChannel {
    async fn wait_open(&self) -> Result<(), MediaError> {
        self.inner.wait_open().await
    }
    fn is_open(&self) -> bool {
        self.inner.is_open()
    }
    async fn send(&self, data: &[u8]) -> Result<(), MediaError> {
        self.log.lock().push(data.to_vec());
        self.inner.send(data).await
    }
    async fn recv(&self) -> Option<Vec<u8>> {
        let msg = self.inner.recv().await?;
        self.log.lock().push(msg.clone());
        Some(msg)
    }
    async fn close(&self) {
        self.inner.close().await
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[tokio::test]
async fn channel_traffic_is_never_plaintext() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();
    let log: TrafficLog = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let tapped: Arc<dyn MediaProvider> = Arc::new(RecordingProvider {
        inner: hub.provider(),
        log: log.clone(),
    });

    let mut a = make_peer(addr, tapped.clone(), fast_config()).await;
    let mut b = make_peer(addr, tapped, fast_config()).await;

    a.connector.connect(b.id()).unwrap();
    let b_id = b.id();
    wait_event(&mut a.events, "A connected", |e| matches!(e, Event::Connected { .. })).await;
    wait_event(&mut b.events, "B connected", |e| matches!(e, Event::Connected { .. })).await;

    a.connector.send_to(b_id, b"attack at dawn").await.unwrap();
    wait_event(&mut b.events, "B data", |e| matches!(e, Event::DataReceived { .. })).await;

    let frames = log.lock();
    assert!(!frames.is_empty());
    for frame in frames.iter() {
        assert!(
            !contains(frame, b"attack at dawn"),
            "plaintext leaked onto the media channel"
        );
    }
}

#[tokio::test]
async fn simultaneous_connect_yields_one_session() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut a = make_peer(addr, hub.provider(), fast_config()).await;
    let mut b = make_peer(addr, hub.provider(), fast_config()).await;
    let (a_id, b_id) = (a.id(), b.id());

    a.connector.connect(b_id).unwrap();
    b.connector.connect(a_id).unwrap();

    wait_event(&mut a.events, "A connected", |e| {
        matches!(e, Event::Connected { peer } if *peer == b_id)
    })
    .await;
    wait_event(&mut b.events, "B connected", |e| {
        matches!(e, Event::Connected { peer } if *peer == a_id)
    })
    .await;

    // Let any straggling attempt settle, then check for exactly one session.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(a.connector.active_peers().len(), 1);
    assert_eq!(b.connector.active_peers().len(), 1);

    // The session is usable in both directions.
    a.connector.send_to(b_id, b"hello").await.unwrap();
    let ev = wait_event(&mut b.events, "B data", |e| matches!(e, Event::DataReceived { .. })).await;
    match ev {
        Event::DataReceived { data, .. } => assert_eq!(data, b"hello"),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn changed_encryption_key_is_rejected() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut a = make_peer(addr, hub.provider(), fast_config()).await;
    let mut b = make_peer(addr, hub.provider(), fast_config()).await;
    let (a_id, b_id) = (a.id(), b.id());

    a.connector.connect(b_id).unwrap();
    wait_event(&mut a.events, "A connected", |e| matches!(e, Event::Connected { .. })).await;
    wait_event(&mut b.events, "B connected", |e| matches!(e, Event::Connected { .. })).await;

    // Impostor: reuses B's signing key but announces a fresh encryption
    // key. Connecting with B's identity also evicts the real B.
    let (impostor, _impostor_income) =
        Client::dial(b.identity.clone(), &addr.to_string()).await.unwrap();

    let mut fake_key = [0u8; 32];
    getrandom::getrandom(&mut fake_key).unwrap();
    let envelope = SealedEnvelope::key_exchange(fake_key).encode();
    let signature = b.identity.sign(&envelope);
    let signed = SignedEnvelope::new(envelope, signature).encode();

    impostor.send(a_id, &signed).await.unwrap();

    let ev = wait_event(&mut a.events, "key mismatch alert", |e| {
        matches!(e, Event::SecurityEvent { .. })
    })
    .await;
    match ev {
        Event::SecurityEvent { peer, alert } => {
            assert_eq!(peer, b_id);
            assert_eq!(alert, SecurityAlert::KeyMismatch);
        }
        other => panic!("unexpected event {other:?}"),
    }

    // No fresh session came out of the impostor's message.
    let extra = timeout(Duration::from_millis(300), a.events.recv()).await;
    if let Ok(Some(ev)) = extra {
        assert!(
            !matches!(ev, Event::Connected { .. }),
            "impostor must not produce a session"
        );
    }
}

#[tokio::test]
async fn offers_beyond_the_rate_limit_are_dropped() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut victim = make_peer(addr, hub.provider(), fast_config()).await;
    let victim_id = victim.id();
    let victim_enc = victim.identity.enc_public();

    let attacker = Arc::new(Identity::generate());
    let (attacker_client, _attacker_income) =
        Client::dial(attacker.clone(), &addr.to_string()).await.unwrap();

    // 100 well-signed offers whose descriptions point nowhere; each one the
    // victim processes dies with a failed attempt event.
    for _ in 0..100 {
        let offer = Signaling::Offer {
            sdp: "memory:0000000000000000".into(),
        };
        let sealed = seal(&offer.encode(), &victim_enc, attacker.enc_secret()).unwrap();
        let envelope = SealedEnvelope::new(attacker.enc_public(), sealed).encode();
        let signature = attacker.sign(&envelope);
        let signed = SignedEnvelope::new(envelope, signature).encode();
        attacker_client.send(victim_id, &signed).await.unwrap();
    }

    // Drain events for a while and count processed offers.
    let mut failed = 0;
    loop {
        match timeout(Duration::from_millis(1500), victim.events.recv()).await {
            Ok(Some(Event::ConnectionFailed { .. })) => failed += 1,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => break,
        }
    }

    assert!(
        failed <= 10,
        "rate limiter let {failed} offers through (limit 10)"
    );
    assert!(failed > 0, "some offers should have been processed");
    assert!(victim.connector.active_peers().is_empty());
}

#[tokio::test]
async fn blocked_peer_gets_no_reply_and_no_session() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut config = fast_config();
    config.key_exchange_timeout = Duration::from_millis(500);

    let mut a = make_peer(addr, hub.provider(), config.clone()).await;
    let mut b = make_peer(addr, hub.provider(), config).await;
    let (a_id, b_id) = (a.id(), b.id());

    a.connector.block(b_id).await;

    // Outbound connect to a blocked peer fails locally and immediately.
    assert!(matches!(
        a.connector.connect(b_id),
        Err(ConnectorError::Blocked)
    ));

    // B's attempt starves: A never answers the key exchange.
    b.connector.connect(a_id).unwrap();
    wait_event(&mut b.events, "B attempt fails", |e| {
        matches!(e, Event::ConnectionFailed { .. })
    })
    .await;

    // A saw nothing and has no session.
    assert!(a.connector.active_peers().is_empty());
    let quiet = timeout(Duration::from_millis(300), a.events.recv()).await;
    assert!(quiet.is_err(), "blocked peer must not generate events");

    // Unblocking restores connectivity.
    a.connector.unblock(b_id);
    b.connector.connect(a_id).unwrap();
    wait_event(&mut b.events, "B connected", |e| matches!(e, Event::Connected { .. })).await;
    wait_event(&mut a.events, "A connected", |e| matches!(e, Event::Connected { .. })).await;
}

#[tokio::test]
async fn unsigned_signaling_changes_no_state() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut a = make_peer(addr, hub.provider(), fast_config()).await;
    let a_id = a.id();

    let mallory = Arc::new(Identity::generate());
    let (mallory_client, _income) = Client::dial(mallory.clone(), &addr.to_string()).await.unwrap();

    // Valid envelope, wrong signature bytes.
    let envelope = SealedEnvelope::key_exchange(mallory.enc_public()).encode();
    let signed = SignedEnvelope::new(envelope, [0u8; 64]).encode();
    mallory_client.send(a_id, &signed).await.unwrap();

    let ev = wait_event(&mut a.events, "signature alert", |e| {
        matches!(e, Event::SecurityEvent { .. })
    })
    .await;
    match ev {
        Event::SecurityEvent { alert, .. } => assert_eq!(alert, SecurityAlert::InvalidSignature),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(a.connector.active_peers().is_empty());
}

#[tokio::test]
async fn send_without_session_fails_synchronously() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();
    let a = make_peer(addr, hub.provider(), fast_config()).await;

    let err = a.connector.send_to(PeerId([9u8; 32]), b"x").await.unwrap_err();
    assert!(matches!(err, ConnectorError::NoSession));
}

#[tokio::test]
async fn disconnect_tears_down_both_sides() {
    let addr = spawn_router().await;
    let hub = MemoryMediaHub::new();

    let mut a = make_peer(addr, hub.provider(), fast_config()).await;
    let mut b = make_peer(addr, hub.provider(), fast_config()).await;
    let (a_id, b_id) = (a.id(), b.id());

    a.connector.connect(b_id).unwrap();
    wait_event(&mut a.events, "A connected", |e| matches!(e, Event::Connected { .. })).await;
    wait_event(&mut b.events, "B connected", |e| matches!(e, Event::Connected { .. })).await;

    a.connector.disconnect(b_id).await.unwrap();

    wait_event(&mut a.events, "A disconnected", |e| {
        matches!(e, Event::Disconnected { .. })
    })
    .await;
    wait_event(&mut b.events, "B disconnected", |e| {
        matches!(e, Event::Disconnected { .. })
    })
    .await;

    assert!(a.connector.active_peers().is_empty());
    assert!(b.connector.active_peers().is_empty());

    let err = a.connector.send_to(b_id, b"late").await.unwrap_err();
    assert!(matches!(
        err,
        ConnectorError::NoSession | ConnectorError::ChannelNotOpen
    ));

    // B can reconnect afterwards.
    b.connector.connect(a_id).unwrap();
    wait_event(&mut b.events, "B reconnected", |e| matches!(e, Event::Connected { .. })).await;
    wait_event(&mut a.events, "A reconnected", |e| matches!(e, Event::Connected { .. })).await;
}
