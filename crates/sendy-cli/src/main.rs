//! sendy: peer-to-peer encrypted chat over a lightweight signaling router.

use clap::Parser;

mod cli;
mod commands;
mod logging;
mod paths;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();
    match cli.run().await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}
