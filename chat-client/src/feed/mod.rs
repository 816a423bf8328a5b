//! Remote feed abstraction for chat-client.
//!
//! The remote authority is consumed through a pluggable boundary: a
//! subscription stream of conversation snapshots plus two write
//! operations (the atomic dual write and the batched field update).
//!
//! # Design
//!
//! Listener registration becomes an explicit [`Subscription`] handle over
//! a bounded channel. Snapshots are delivered in arrival order; a closed
//! stream means delivery is paused, not that the conversation errored;
//! the coordinator keeps serving the last merged view.
//!
//! # Example
//!
//! ```ignore
//! let mut sub = feed.subscribe(&conversation_id).await?;
//! while let Some(snapshot) = sub.next().await {
//!     // merge the snapshot
//! }
//! ```

mod mock;

pub use mock::{MockFeed, RecordedPatch};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use chat_types::{
    AckKind, Conversation, ConversationId, Message, MessageId, SummaryUpdate, Timestamp, UserId,
};

/// Capacity of the bounded per-subscription snapshot channel.
pub const SNAPSHOT_CHANNEL_CAPACITY: usize = 32;

/// Remote feed errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The remote service is unreachable or unavailable.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// The operation timed out (deadline exceeded).
    #[error("operation timed out")]
    Timeout,

    /// The remote rejected the operation for capacity reasons.
    #[error("resource exhausted")]
    Exhausted,

    /// The remote rejected the operation for permission reasons.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The request itself was malformed.
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl FeedError {
    /// Whether retrying with backoff is worthwhile.
    ///
    /// Network timeouts, unavailability, and resource exhaustion are
    /// transient; permission and validation failures are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout | Self::Exhausted)
    }
}

/// A live subscription delivering snapshots in arrival order.
///
/// Dropping the handle (or calling [`Subscription::cancel`]) detaches the
/// listener; the feed notices on its next delivery attempt.
pub struct Subscription<T> {
    receiver: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Wrap a receiver into a subscription handle.
    pub fn new(receiver: mpsc::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// The next snapshot, or `None` once delivery is paused/closed.
    pub async fn next(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Detach the listener.
    pub fn cancel(self) {}
}

/// A single field-level mutation applied to a batch of messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    /// Replace the text of an edited message.
    Edit {
        /// The new text.
        text: String,
        /// When the edit happened.
        edited_at: Timestamp,
        /// Full edit history including the replaced text.
        edit_history: Vec<String>,
    },
    /// Tombstone the message for everyone (text becomes the placeholder).
    Tombstone,
    /// Record a per-user local deletion.
    DeletedBy(UserId),
    /// Add a user to the delivered/read acknowledgement sets.
    ///
    /// Read implies delivered: a `Read` ack fills both sets.
    Ack {
        /// The acknowledging user.
        user: UserId,
        /// Which set the acknowledgement targets.
        kind: AckKind,
    },
}

/// Trait for remote feed adapters.
///
/// Implementations bridge to the actual backend. The contract the core
/// relies on:
/// - snapshots for a conversation are eventually delivered after any
///   write this adapter acknowledged (read-your-writes is not required);
/// - [`RemoteFeed::write_message`] commits the message and the
///   conversation summary together or not at all: a message must never
///   become visible without the conversation-list ordering update;
/// - [`RemoteFeed::batch_update`] applies one mutation to all targets as
///   a single remote operation, bounding write amplification in large
///   conversations. Callers pre-compute the qualifying target set.
#[async_trait]
pub trait RemoteFeed: Send + Sync + 'static {
    /// Subscribe to message snapshots for a conversation.
    async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<Subscription<Vec<Message>>, FeedError>;

    /// Subscribe to the conversation-list snapshots for a user.
    async fn subscribe_conversations(
        &self,
        user: &UserId,
    ) -> Result<Subscription<Vec<Conversation>>, FeedError>;

    /// Atomically append a message and update its conversation summary.
    async fn write_message(
        &self,
        message: &Message,
        summary: &SummaryUpdate,
    ) -> Result<(), FeedError>;

    /// Apply one field update to a batch of messages.
    ///
    /// Returns the number of messages updated.
    async fn batch_update(
        &self,
        conversation: &ConversationId,
        targets: &[MessageId],
        update: FieldUpdate,
    ) -> Result<u32, FeedError>;
}
