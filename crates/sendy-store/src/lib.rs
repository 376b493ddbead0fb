//! Contact and message persistence.
//!
//! The connector and the chat layer consume this narrow contract; failures
//! here are isolated and never poison live session state.

#![forbid(unsafe_code)]

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{Contact, ContactStore, Direction, Message, SearchResult, StoreError};
