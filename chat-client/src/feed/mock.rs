//! Mock remote feed for testing.
//!
//! Allows pushing snapshots to subscribers, capturing writes for
//! verification, and scripting failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use chat_types::{
    Conversation, ConversationId, Message, MessageId, SummaryUpdate, UserId,
};

use super::{FeedError, FieldUpdate, RemoteFeed, Subscription, SNAPSHOT_CHANNEL_CAPACITY};

/// A recorded `batch_update` call.
#[derive(Debug, Clone)]
pub struct RecordedPatch {
    /// The conversation the update targeted.
    pub conversation: ConversationId,
    /// The target message ids.
    pub targets: Vec<MessageId>,
    /// The applied update.
    pub update: FieldUpdate,
}

/// Mock remote feed for testing.
///
/// Clones share state, so a test can keep a handle while the client owns
/// another.
#[derive(Debug, Default)]
pub struct MockFeed {
    inner: Arc<Mutex<MockFeedInner>>,
}

#[derive(Debug, Default)]
struct MockFeedInner {
    message_subs: HashMap<ConversationId, Vec<mpsc::Sender<Vec<Message>>>>,
    conversation_subs: HashMap<UserId, Vec<mpsc::Sender<Vec<Conversation>>>>,
    dual_writes: Vec<(Message, SummaryUpdate)>,
    patches: Vec<RecordedPatch>,
    write_failures: VecDeque<FeedError>,
    patch_failures: VecDeque<FeedError>,
}

impl MockFeed {
    /// Create a new mock feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a message snapshot to every subscriber of a conversation.
    pub fn push_snapshot(&self, conversation: &ConversationId, messages: Vec<Message>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(senders) = inner.message_subs.get_mut(conversation) {
            senders.retain(|tx| tx.try_send(messages.clone()).is_ok());
        }
    }

    /// Deliver a conversation-list snapshot to a user's subscribers.
    pub fn push_conversations(&self, user: &UserId, conversations: Vec<Conversation>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(senders) = inner.conversation_subs.get_mut(user) {
            senders.retain(|tx| tx.try_send(conversations.clone()).is_ok());
        }
    }

    /// All successful dual writes, in order.
    pub fn dual_writes(&self) -> Vec<(Message, SummaryUpdate)> {
        self.inner.lock().unwrap().dual_writes.clone()
    }

    /// All successful batch updates, in order.
    pub fn patches(&self) -> Vec<RecordedPatch> {
        self.inner.lock().unwrap().patches.clone()
    }

    /// Cause the next `write_message` to fail with the given error.
    ///
    /// Stackable: calling this n times fails the next n writes.
    pub fn fail_next_write(&self, error: FeedError) {
        self.inner.lock().unwrap().write_failures.push_back(error);
    }

    /// Cause the next `batch_update` to fail with the given error.
    pub fn fail_next_patch(&self, error: FeedError) {
        self.inner.lock().unwrap().patch_failures.push_back(error);
    }

    /// Number of live subscribers for a conversation.
    pub fn subscriber_count(&self, conversation: &ConversationId) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if let Some(senders) = inner.message_subs.get_mut(conversation) {
            senders.retain(|tx| !tx.is_closed());
            senders.len()
        } else {
            0
        }
    }
}

impl Clone for MockFeed {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteFeed for MockFeed {
    async fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> Result<Subscription<Vec<Message>>, FeedError> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let mut inner = self.inner.lock().unwrap();
        inner
            .message_subs
            .entry(conversation.clone())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn subscribe_conversations(
        &self,
        user: &UserId,
    ) -> Result<Subscription<Vec<Conversation>>, FeedError> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        let mut inner = self.inner.lock().unwrap();
        inner
            .conversation_subs
            .entry(user.clone())
            .or_default()
            .push(tx);
        Ok(Subscription::new(rx))
    }

    async fn write_message(
        &self,
        message: &Message,
        summary: &SummaryUpdate,
    ) -> Result<(), FeedError> {
        let mut inner = self.inner.lock().unwrap();

        // A scripted failure fails both halves: nothing is recorded.
        if let Some(error) = inner.write_failures.pop_front() {
            return Err(error);
        }

        inner.dual_writes.push((message.clone(), summary.clone()));
        Ok(())
    }

    async fn batch_update(
        &self,
        conversation: &ConversationId,
        targets: &[MessageId],
        update: FieldUpdate,
    ) -> Result<u32, FeedError> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(error) = inner.patch_failures.pop_front() {
            return Err(error);
        }

        inner.patches.push(RecordedPatch {
            conversation: conversation.clone(),
            targets: targets.to_vec(),
            update,
        });
        Ok(targets.len() as u32)
    }
}
