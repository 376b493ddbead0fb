//! `sendy chat`: line-oriented chat client.
//!
//! Wires the full stack: identity keyfile, router client, connector, and
//! the SQLite store. Sessions ride whatever media provider is plugged in;
//! this build ships the in-process hub, so peer connections form between
//! endpoints sharing the hub while everything else (signaling, encryption,
//! journaling) runs exactly as in production.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::timeout;
use tracing::{info, warn};

use sendy_connector::{Connector, ConnectorConfig, Event, MemoryMediaHub};
use sendy_crypto::Identity;
use sendy_proto::PeerId;
use sendy_router::Client;
use sendy_store::{ContactStore, Direction, SqliteStore};

use crate::logging;
use crate::paths::{open_log_file, DataRoot};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Verified defaults; override with --stun-servers or SENDY_STUN_SERVERS.
const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
    "stun:global.stun.twilio.com:3478",
];

pub async fn run(
    router_addr: &str,
    data: Option<PathBuf>,
    stun_flag: Option<String>,
) -> anyhow::Result<()> {
    let root = DataRoot::prepare(data)?;
    let log_file = open_log_file(&root.log_dir("chat"), "chat")?;
    logging::init_file_only(log_file);
    info!(root = %root.root.display(), "starting sendy chat");

    let (identity, generated) = Identity::load_or_generate(&root.key_file())?;
    let identity = Arc::new(identity);
    if generated {
        println!("New keys generated and saved");
    } else {
        println!("Loaded existing keys");
    }
    println!("Your ID: {}", identity.peer_id());

    let stun_servers = resolve_stun_servers(stun_flag);
    info!(servers = ?stun_servers, "STUN configuration");

    println!("Connecting to router at {router_addr}...");
    let (client, income) = timeout(DIAL_TIMEOUT, Client::dial(identity.clone(), router_addr))
        .await
        .map_err(|_| anyhow::anyhow!("connection timeout to router at {router_addr}"))?
        .with_context(|| format!("failed to connect to router at {router_addr}"))?;
    println!("Connected to router");

    let hub = MemoryMediaHub::new();
    let (connector, events) = Connector::new(
        client,
        income,
        hub.provider(),
        identity.clone(),
        ConnectorConfig::default(),
    );

    let store: Arc<dyn ContactStore> =
        Arc::new(SqliteStore::open(root.db_file()).context("failed to open database")?);
    println!("Database opened");

    tokio::spawn(print_events(events, store.clone()));

    println!();
    println!("Commands: connect <id>, msg <id> <text>, add <id> <name>, contacts,");
    println!("          history <id>, search <text>, peers, block <id>, unblock <id>, quit");
    repl(connector, store).await
}

fn resolve_stun_servers(flag: Option<String>) -> Vec<String> {
    let from_list = |raw: String| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
    };

    if let Some(raw) = flag {
        return from_list(raw);
    }
    if let Ok(raw) = std::env::var("SENDY_STUN_SERVERS") {
        if !raw.trim().is_empty() {
            return from_list(raw);
        }
    }
    DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect()
}

async fn print_events(
    mut events: tokio::sync::mpsc::Receiver<Event>,
    store: Arc<dyn ContactStore>,
) {
    while let Some(event) = events.recv().await {
        match event {
            Event::Connected { peer } => {
                println!("[{}] connected", peer.short());
                if let Err(e) = store.record_last_seen(peer).await {
                    warn!(peer = %peer.short(), error = %e, "last-seen update failed");
                }
            }
            Event::Disconnected { peer } => println!("[{}] disconnected", peer.short()),
            Event::ConnectionFailed { peer, reason } => {
                println!("[{}] connection failed: {reason}", peer.short())
            }
            Event::DataReceived { peer, data } => {
                let text = String::from_utf8_lossy(&data).to_string();
                println!("[{}] {text}", peer.short());

                // Unknown correspondents get journaled under their short id.
                if matches!(store.contact(peer).await, Ok(None)) {
                    if let Err(e) = store.upsert_contact(peer, &peer.short()).await {
                        warn!(peer = %peer.short(), error = %e, "contact insert failed");
                    }
                }
                if let Err(e) = store
                    .append_message(peer, &text, Direction::Incoming, now_unix())
                    .await
                {
                    warn!(peer = %peer.short(), error = %e, "message journal failed");
                }
            }
            Event::SecurityEvent { peer, alert } => {
                println!("[{}] SECURITY: {alert:?}, message dropped", peer.short())
            }
            Event::Error { peer, reason } => println!("[{}] error: {reason}", peer.short()),
        }
    }
}

async fn repl(connector: Arc<Connector>, store: Arc<dyn ContactStore>) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, ' ');
        let command = parts.next().unwrap_or_default();

        match command {
            "quit" | "exit" => break,
            "connect" => match parse_peer(parts.next()) {
                Ok(peer) => {
                    if let Err(e) = connector.connect(peer) {
                        println!("connect failed: {e}");
                    }
                }
                Err(e) => println!("{e}"),
            },
            "msg" => {
                let peer = parse_peer(parts.next());
                let text = parts.next().unwrap_or_default();
                match peer {
                    Ok(peer) if !text.is_empty() => {
                        match connector.send_to(peer, text.as_bytes()).await {
                            Ok(()) => {
                                if let Err(e) = store
                                    .append_message(peer, text, Direction::Outgoing, now_unix())
                                    .await
                                {
                                    warn!(error = %e, "message journal failed");
                                }
                            }
                            Err(e) => println!("send failed: {e}"),
                        }
                    }
                    Ok(_) => println!("usage: msg <id> <text>"),
                    Err(e) => println!("{e}"),
                }
            }
            "add" => {
                let peer = parse_peer(parts.next());
                let name = parts.next().unwrap_or_default();
                match peer {
                    Ok(peer) if !name.is_empty() => {
                        match store.upsert_contact(peer, name).await {
                            Ok(()) => println!("contact saved"),
                            Err(e) => println!("add failed: {e}"),
                        }
                    }
                    Ok(_) => println!("usage: add <id> <name>"),
                    Err(e) => println!("{e}"),
                }
            }
            "contacts" => match store.contacts().await {
                Ok(contacts) if contacts.is_empty() => println!("no contacts"),
                Ok(contacts) => {
                    for c in contacts {
                        let flag = if c.is_blocked { " [blocked]" } else { "" };
                        println!("{} {}{}", c.peer_id, c.name, flag);
                    }
                }
                Err(e) => println!("contacts failed: {e}"),
            },
            "history" => match parse_peer(parts.next()) {
                Ok(peer) => match store.load_messages(peer, 50).await {
                    Ok(messages) => {
                        for m in messages {
                            let arrow = match m.direction {
                                Direction::Outgoing => "->",
                                Direction::Incoming => "<-",
                            };
                            println!("{arrow} {}", m.content);
                        }
                        let _ = store.mark_read(peer).await;
                    }
                    Err(e) => println!("history failed: {e}"),
                },
                Err(e) => println!("{e}"),
            },
            "search" => {
                let query = line.strip_prefix("search ").unwrap_or_default().trim();
                if query.is_empty() {
                    println!("usage: search <text>");
                } else {
                    match store.search_messages(query, 20).await {
                        Ok(hits) if hits.is_empty() => println!("no matches"),
                        Ok(hits) => {
                            for hit in hits {
                                println!("[{}] {}", hit.contact_name, hit.message.content);
                            }
                        }
                        Err(e) => println!("search failed: {e}"),
                    }
                }
            }
            "peers" => {
                for peer in connector.active_peers() {
                    println!("{peer}");
                }
            }
            "block" => match parse_peer(parts.next()) {
                Ok(peer) => {
                    connector.block(peer).await;
                    if let Err(e) = store.set_blocked(peer, true).await {
                        warn!(error = %e, "block flag not persisted");
                    }
                    println!("blocked");
                }
                Err(e) => println!("{e}"),
            },
            "unblock" => match parse_peer(parts.next()) {
                Ok(peer) => {
                    connector.unblock(peer);
                    if let Err(e) = store.set_blocked(peer, false).await {
                        warn!(error = %e, "block flag not persisted");
                    }
                    println!("unblocked");
                }
                Err(e) => println!("{e}"),
            },
            other => println!("unknown command: {other}"),
        }
    }

    connector.disconnect_all().await;
    Ok(())
}

fn parse_peer(arg: Option<&str>) -> Result<PeerId, String> {
    let arg = arg.ok_or("missing peer id")?;
    arg.parse().map_err(|e| format!("{e}"))
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
