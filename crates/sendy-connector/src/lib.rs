//! The peer connector: drives signaling through the router, brings up
//! media-transport peer connections, and runs the authenticated encrypted
//! message channel on top of them.
//!
//! One connector instance multiplexes any number of per-peer state
//! machines. Signaling travels through the router as signed envelopes;
//! application traffic flows peer-to-peer over the media transport's data
//! channel as sealed ciphertext, with no router involvement.

#![forbid(unsafe_code)]

pub mod connector;
pub mod events;
pub mod media;
pub mod memory;
pub mod rate;

pub use connector::{Connector, ConnectorConfig, ConnectorError};
pub use events::{Event, SecurityAlert};
pub use media::{DataChannel, MediaConnection, MediaError, MediaProvider};
pub use memory::MemoryMediaHub;
