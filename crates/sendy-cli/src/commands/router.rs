//! `sendy router`: run the signaling relay.

use std::path::PathBuf;

use anyhow::Context;
use tracing::info;

use sendy_router::{Router, RouterConfig};

use crate::logging;
use crate::paths::{open_log_file, DataRoot};

pub async fn run(addr: &str, logdir: Option<PathBuf>) -> anyhow::Result<()> {
    let log_dir = match logdir {
        Some(dir) => dir.join("router"),
        None => DataRoot::prepare(None)?.log_dir("router"),
    };
    let log_file = open_log_file(&log_dir, "router")?;
    logging::init_stdout_and_file(Some(log_file));

    let listen_addr = addr
        .parse()
        .with_context(|| format!("invalid listen address {addr}"))?;
    let config = RouterConfig::default().with_listen_addr(listen_addr);

    let router = Router::bind(config).await?;
    info!(address = %router.local_addr(), "starting sendy router");
    router.run().await?;
    Ok(())
}
