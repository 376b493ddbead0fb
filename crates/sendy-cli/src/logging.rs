//! Tracing setup for the binaries. `DEBUG=1` raises the default level;
//! `RUST_LOG` wins when set.

use std::fs::File;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn default_filter() -> EnvFilter {
    let default_level = if std::env::var_os("DEBUG").is_some() {
        "debug"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Log to stdout and, when given, a file as well. Used by the router.
pub fn init_stdout_and_file(file: Option<File>) {
    let registry = tracing_subscriber::registry()
        .with(default_filter())
        .with(tracing_subscriber::fmt::layer());

    match file {
        Some(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Arc::new(file)),
            )
            .init(),
        None => registry.init(),
    }
}

/// Log to a file only; stdout belongs to the interactive client.
pub fn init_file_only(file: File) {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(file)),
        )
        .init();
}
