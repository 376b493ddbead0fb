//! `sendy demo`: self-contained loopback proof: an in-process router, two
//! identities, the in-process media hub, one encrypted round trip.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::time::timeout;

use sendy_connector::{Connector, ConnectorConfig, Event, MemoryMediaHub};
use sendy_crypto::Identity;
use sendy_router::{Client, Router, RouterConfig};

use crate::logging;

const STEP_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    logging::init_stdout_and_file(None);

    let config = RouterConfig::default().with_listen_addr("127.0.0.1:0".parse()?);
    let router = Router::bind(config).await?;
    let addr = router.local_addr();
    tokio::spawn(async move {
        let _ = router.run().await;
    });
    println!("router listening on {addr}");

    let hub = MemoryMediaHub::new();

    let alice = Arc::new(Identity::generate());
    let bob = Arc::new(Identity::generate());
    println!("alice: {}", alice.peer_id());
    println!("bob:   {}", bob.peer_id());

    let (alice_client, alice_income) = Client::dial(alice.clone(), &addr.to_string()).await?;
    let (bob_client, bob_income) = Client::dial(bob.clone(), &addr.to_string()).await?;

    let (alice_conn, mut alice_events) = Connector::new(
        alice_client,
        alice_income,
        hub.provider(),
        alice.clone(),
        ConnectorConfig::default(),
    );
    let (bob_conn, mut bob_events) = Connector::new(
        bob_client,
        bob_income,
        hub.provider(),
        bob.clone(),
        ConnectorConfig::default(),
    );

    alice_conn.connect(bob.peer_id())?;

    wait_for(&mut alice_events, "alice connected", |e| {
        matches!(e, Event::Connected { .. })
    })
    .await?;
    wait_for(&mut bob_events, "bob connected", |e| {
        matches!(e, Event::Connected { .. })
    })
    .await?;
    println!("session established");

    alice_conn.send_to(bob.peer_id(), b"ping").await?;
    let ev = wait_for(&mut bob_events, "bob data", |e| {
        matches!(e, Event::DataReceived { .. })
    })
    .await?;
    if let Event::DataReceived { data, .. } = ev {
        println!("bob received:   {}", String::from_utf8_lossy(&data));
    }

    bob_conn.send_to(alice.peer_id(), b"pong").await?;
    let ev = wait_for(&mut alice_events, "alice data", |e| {
        matches!(e, Event::DataReceived { .. })
    })
    .await?;
    if let Event::DataReceived { data, .. } = ev {
        println!("alice received: {}", String::from_utf8_lossy(&data));
    }

    println!("demo complete");
    Ok(())
}

async fn wait_for<F>(
    events: &mut tokio::sync::mpsc::Receiver<Event>,
    what: &str,
    mut pred: F,
) -> anyhow::Result<Event>
where
    F: FnMut(&Event) -> bool,
{
    timeout(STEP_TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(ev) if pred(&ev) => return Ok(ev),
                Some(_) => continue,
                None => anyhow::bail!("event stream ended while waiting for {what}"),
            }
        }
    })
    .await
    .with_context(|| format!("timed out waiting for {what}"))?
}
