//! # chat-store
//!
//! Durable local message store for chatsync.
//!
//! This is the Local Store of the synchronization core: key-indexed
//! persistence for messages and conversations with no network awareness.
//! The in-memory merged view remains the source of truth for UI
//! responsiveness; this crate makes it durable and survives restarts.
//!
//! - [`LocalStore`] - the storage contract consumed by `chat-client`
//! - [`SqliteStore`] - SQLite backend (WAL mode), with an in-memory
//!   constructor for tests
//! - [`spawn_prune_task`] - periodic cleanup of old synced messages

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod prune;
mod sqlite;
mod store;

pub use error::StoreError;
pub use prune::{spawn_prune_task, PruneConfig};
pub use sqlite::SqliteStore;
pub use store::LocalStore;
