//! # chat-client
//!
//! Client library for the chatsync local-first message synchronization
//! core.
//!
//! This is the crate applications use to send and receive chat messages
//! reliably over an unreliable network. It reconciles three concurrently
//! changing views of each conversation (optimistic local writes, the
//! remote real-time feed, and the durable local replica) into one
//! ordered, deduplicated view.
//!
//! ## Architecture
//!
//! ```text
//! Application → ChatClient → RemoteFeed → Network
//!                   ↓
//!           chat-core (pure merge/status/retry logic)
//!                   ↓
//!           chat-store (durable local replica)
//! ```
//!
//! - **Send pipeline**: validate → optimistic local insert → atomic dual
//!   remote write (message + conversation summary) with retry, timeout,
//!   and explicit error parking.
//! - **Status tracker**: batched delivered/read receipt marking.
//! - **Coordinator**: one debounced single-writer merge loop per open
//!   conversation, publishing through `tokio::sync::watch`.
//!
//! ## Example
//!
//! ```ignore
//! use chatsync_client::{ChatClient, ChatConfig, MockFeed, NoopNotifier};
//!
//! let store = SqliteStore::new(path).await?;
//! let client = ChatClient::new(
//!     ChatConfig::new(UserId::new("alice")),
//!     feed,
//!     Arc::new(store),
//!     Arc::new(NoopNotifier),
//! );
//!
//! let conversation = Conversation::direct(&alice, &bob, Timestamp::now())?;
//! let mut view = client.open_conversation(&conversation).await?;
//! client.send(&conversation.id, "hello").await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod feed;
pub mod limits;
pub mod notify;
mod retry;
mod session;

pub use client::{ChatClient, ChatConfig, InboxHandle};
pub use feed::{FeedError, FieldUpdate, MockFeed, RecordedPatch, RemoteFeed, Subscription};
pub use limits::{SendGate, SendLimits};
pub use notify::{NewMessageNotice, NoopNotifier, Notifier, RecordingNotifier};
pub use session::ViewHandle;
