//! The sendy router: a TCP relay that authenticates peers by their Ed25519
//! identity and forwards opaque frames between them.
//!
//! The router holds no payload state. Every client frame is either streamed
//! to the live recipient or discarded with a `NotFound` reply; there is no
//! queueing and no store-and-forward.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod server;

pub use client::{Client, ClientError, Income, PendingReply};
pub use config::RouterConfig;
pub use server::{Router, RouterError};
