//! Command definitions and argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands;

#[derive(Parser, Debug)]
#[command(name = "sendy")]
#[command(version, about = "Peer-to-peer encrypted chat with a lightweight signaling router")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the signaling router server.
    Router {
        /// Listen address.
        #[arg(short, long, default_value = "0.0.0.0:9090")]
        addr: String,
        /// Directory for log files.
        #[arg(short, long)]
        logdir: Option<PathBuf>,
    },

    /// Run the chat client (line oriented).
    Chat {
        /// Router address to dial.
        #[arg(long, default_value = "127.0.0.1:9090")]
        router: String,
        /// Data root directory (defaults to ~/.sendy).
        #[arg(long)]
        data: Option<PathBuf>,
        /// Comma-separated STUN server list; overrides SENDY_STUN_SERVERS.
        #[arg(long)]
        stun_servers: Option<String>,
    },

    /// Generate a fresh identity keypair and print it.
    Keygen,

    /// Run a self-contained loopback demo: router plus two peers in one
    /// process, connect, exchange a ping and a pong.
    Demo,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Router { addr, logdir } => commands::router::run(&addr, logdir).await,
            Commands::Chat {
                router,
                data,
                stun_servers,
            } => commands::chat::run(&router, data, stun_servers).await,
            Commands::Keygen => commands::keygen::run(),
            Commands::Demo => commands::demo::run().await,
        }
    }
}
