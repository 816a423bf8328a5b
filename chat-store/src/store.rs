//! The Local Store contract.

use std::time::Duration;

use async_trait::async_trait;
use chat_types::{
    AckKind, Conversation, ConversationId, DeliveryStatus, Message, MessageId, Timestamp, UserId,
};

use crate::error::StoreError;

/// Trait for local persistence backends.
///
/// All reads-then-writes on a single message row are atomic inside the
/// implementation (read-modify-write, never blind-write), so concurrent
/// tasks (a send, a merge, a delivery mark) cannot lose updates racing
/// on the same row.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Upsert a message keyed by its id.
    ///
    /// Overwrites all mutable fields idempotently: replaying the same
    /// snapshot is a no-op in effect. `synced` records whether the row
    /// matches remote-confirmed state.
    async fn put_message(&self, message: &Message, synced: bool) -> Result<(), StoreError>;

    /// Transition a message's delivery status.
    ///
    /// The transition is monotonic: a regression on the status ladder is
    /// ignored, except that any status may move into `Error` and a
    /// confirmation clears `Error`. Returns `NotFound` for absent ids.
    async fn update_status(
        &self,
        id: &MessageId,
        status: DeliveryStatus,
        synced: bool,
    ) -> Result<(), StoreError>;

    /// Look up a single message by id.
    async fn message(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    /// All messages of a conversation, ordered by `(created_at, id)`.
    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, StoreError>;

    /// Up to `limit` messages strictly older than `before`, ordered by
    /// `(created_at, id)`.
    async fn messages_before(
        &self,
        conversation: &ConversationId,
        before: Timestamp,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError>;

    /// All messages not yet confirmed by the remote (unsynced, sending, or
    /// failed).
    async fn pending_messages(&self) -> Result<Vec<Message>, StoreError>;

    /// Add `user` to the acknowledgement sets of the given messages.
    ///
    /// Read implies delivered. Applied as one transaction; missing ids are
    /// skipped. Returns the number of rows that actually changed.
    async fn apply_acks(
        &self,
        ids: &[MessageId],
        user: &UserId,
        kind: AckKind,
    ) -> Result<u32, StoreError>;

    /// Delete a message row. Deleting an absent id is a no-op.
    async fn delete_message(&self, id: &MessageId) -> Result<(), StoreError>;

    /// Delete a conversation row and all of its messages.
    async fn delete_conversation(&self, conversation: &ConversationId) -> Result<(), StoreError>;

    /// Upsert a conversation keyed by its id.
    async fn put_conversation(
        &self,
        conversation: &Conversation,
        synced: bool,
    ) -> Result<(), StoreError>;

    /// Look up a single conversation by id.
    async fn conversation(
        &self,
        id: &ConversationId,
    ) -> Result<Option<Conversation>, StoreError>;

    /// Conversations `user` participates in, most recent activity first.
    async fn conversations_for(&self, user: &UserId) -> Result<Vec<Conversation>, StoreError>;

    /// Delete synced messages older than `max_age`.
    ///
    /// Unsynced rows (pending or failed sends) are never pruned. Returns
    /// the number of rows deleted.
    async fn prune_older_than(&self, max_age: Duration) -> Result<u64, StoreError>;
}
