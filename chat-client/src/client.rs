//! ChatClient - the main interface for chatsync.
//!
//! This module provides [`ChatClient`], the primary API for applications
//! to send and receive messages through the synchronization core.
//!
//! # Architecture
//!
//! ChatClient owns the per-conversation sessions (one remote subscription
//! and one single-writer merge loop each), the send pipeline, and the
//! batched receipt marking. Pure logic lives in chat-core; durable state
//! lives behind the `LocalStore` trait; the remote side is reached only
//! through the `RemoteFeed` trait.
//!
//! ```text
//! Application → ChatClient → RemoteFeed → Network
//!                   ↓
//!              chat-core (pure merge/status/retry logic)
//!                   ↓
//!              chat-store (durable local replica)
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use chat_core::{
    check_delete_for_everyone, check_edit, delete_for_revision, edit_revision, plan_acks,
    tombstone_revision, RetryPolicy, Revision,
};
use chat_store::{LocalStore, StoreError};
use chat_types::{
    AckKind, ChatError, Conversation, ConversationId, DeliveryStatus, Message, MessageId,
    SummaryUpdate, Timestamp, UserId,
};

use crate::feed::{FeedError, FieldUpdate, RemoteFeed};
use crate::limits::{SendGate, SendLimits};
use crate::notify::Notifier;
use crate::retry::with_retry;
use crate::session::{
    run_inbox, run_session, ConversationSession, InboxContext, SessionContext, ViewHandle,
};

/// Configuration for ChatClient.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// The local user.
    pub user_id: UserId,
    /// Maximum message length in characters (after trimming).
    pub max_text_len: usize,
    /// How many messages to hydrate from the local replica on open;
    /// older history is paged in with [`ChatClient::load_older`].
    pub hydrate_limit: u32,
    /// Debounce window for coalescing bursty snapshot deliveries.
    pub debounce: Duration,
    /// A send stuck longer than this becomes `Error`.
    pub send_timeout: Duration,
    /// Backoff policy for transient remote failures.
    pub retry: RetryPolicy,
    /// Send-rate limits.
    pub limits: SendLimits,
}

impl ChatConfig {
    /// Create a configuration for the given local user.
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            max_text_len: 4096,
            hydrate_limit: 100,
            debounce: Duration::from_millis(100),
            send_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            limits: SendLimits::default(),
        }
    }

    /// Set the maximum message length.
    pub fn with_max_text_len(mut self, len: usize) -> Self {
        self.max_text_len = len;
        self
    }

    /// Set the hydration window.
    pub fn with_hydrate_limit(mut self, limit: u32) -> Self {
        self.hydrate_limit = limit;
        self
    }

    /// Set the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the send-rate limits.
    pub fn with_limits(mut self, limits: SendLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// A live, read-only handle onto the user's conversation list, most
/// recent activity first.
pub struct InboxHandle {
    receiver: watch::Receiver<Vec<Conversation>>,
}

impl InboxHandle {
    /// The current conversation list.
    pub fn current(&self) -> Vec<Conversation> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published change.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

/// The main synchronization client.
///
/// Construct once at process start with the store, feed, and notifier
/// passed in explicitly; the client holds no global state.
pub struct ChatClient<F: RemoteFeed> {
    config: ChatConfig,
    feed: Arc<F>,
    store: Arc<dyn LocalStore>,
    notifier: Arc<dyn Notifier>,
    gate: SendGate,
    sessions: DashMap<ConversationId, Arc<ConversationSession>>,
    inbox_task: StdMutex<Option<JoinHandle<()>>>,
    focus: Arc<StdMutex<Option<ConversationId>>>,
}

impl<F: RemoteFeed> ChatClient<F> {
    /// Create a new ChatClient.
    pub fn new(
        config: ChatConfig,
        feed: F,
        store: Arc<dyn LocalStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let gate = SendGate::new(config.limits.clone());
        Self {
            config,
            feed: Arc::new(feed),
            store,
            notifier,
            gate,
            sessions: DashMap::new(),
            inbox_task: StdMutex::new(None),
            focus: Arc::new(StdMutex::new(None)),
        }
    }

    /// The client configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Register a conversation in the local replica.
    ///
    /// Idempotent: an already-known conversation (including its synced
    /// summary) is left untouched. Direct conversations derive their id
    /// deterministically, so this needs no coordination round-trip; the
    /// remote side materializes the conversation with the first dual
    /// write.
    pub async fn ensure_conversation(&self, conversation: &Conversation) -> Result<(), ChatError> {
        if self
            .store
            .conversation(&conversation.id)
            .await
            .map_err(storage_error)?
            .is_some()
        {
            return Ok(());
        }
        self.store
            .put_conversation(conversation, false)
            .await
            .map_err(storage_error)
    }

    /// Open a conversation: hydrate from the local replica, then attach
    /// to the remote feed.
    ///
    /// Returns a [`ViewHandle`] publishing the merged view. Opening an
    /// already-open conversation returns another handle onto the same
    /// session; there is never more than one remote subscription per
    /// conversation. A failed attach is paused delivery, not an error;
    /// the handle keeps serving the local replica.
    pub async fn open_conversation(
        &self,
        conversation: &Conversation,
    ) -> Result<ViewHandle, ChatError> {
        if let Some(existing) = self.sessions.get(&conversation.id) {
            return Ok(existing.subscribe_view());
        }

        // Fast path: serve the local replica before any network wait.
        let initial = self
            .store
            .messages_before(
                &conversation.id,
                Timestamp::from_millis(u64::MAX),
                self.config.hydrate_limit,
            )
            .await
            .map_err(storage_error)?;

        let subscription = self.feed.subscribe(&conversation.id).await;

        let (publisher, receiver) = watch::channel(initial.clone());
        let publisher = Arc::new(publisher);
        let view = Arc::new(AsyncMutex::new(initial));
        let session = Arc::new(ConversationSession::new(
            Arc::clone(&view),
            Arc::clone(&publisher),
        ));

        match self.sessions.entry(conversation.id.clone()) {
            Entry::Occupied(existing) => {
                // Lost a race with a concurrent open; the subscription we
                // took is dropped and the feed prunes it.
                return Ok(existing.get().subscribe_view());
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&session));
            }
        }

        match subscription {
            Ok(subscription) => {
                let ctx = SessionContext {
                    local_user: self.config.user_id.clone(),
                    conversation: conversation.clone(),
                    store: Arc::clone(&self.store),
                    notifier: Arc::clone(&self.notifier),
                    focus: Arc::clone(&self.focus),
                    view,
                    publisher,
                    retry: self.config.retry.clone(),
                };
                let task = tokio::spawn(run_session(ctx, subscription, self.config.debounce));
                session.attach_task(task);
            }
            Err(e) => {
                tracing::warn!(
                    "could not attach to remote feed for {}: {} (serving local replica)",
                    conversation.id,
                    e
                );
            }
        }

        Ok(ViewHandle::new(receiver))
    }

    /// Close a conversation: detach the remote listener and cancel any
    /// pending debounce. The local replica is retained; an in-flight send
    /// still runs to completion.
    pub fn close_conversation(&self, conversation: &ConversationId) {
        if let Some((_, session)) = self.sessions.remove(conversation) {
            session.abort();
            tracing::debug!("closed conversation {}", conversation);
        }
    }

    /// Mark which conversation is in foreground focus.
    ///
    /// Inbound messages for the focused conversation do not notify.
    pub fn set_focus(&self, conversation: Option<ConversationId>) {
        *self.focus.lock().unwrap() = conversation;
    }

    /// Send a message.
    ///
    /// The message is visible in the merged view and the local replica
    /// before any network round-trip. The remote dual write (message +
    /// conversation summary) then runs with retry and a timeout in its
    /// own task; detaching the conversation never cancels it. On failure
    /// the message parks at `Error` for an explicit
    /// [`ChatClient::retry_send`] or [`ChatClient::discard_failed`]; it
    /// never silently vanishes.
    pub async fn send(
        &self,
        conversation: &ConversationId,
        text: &str,
    ) -> Result<MessageId, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.config.max_text_len {
            return Err(ChatError::MessageTooLong {
                len,
                limit: self.config.max_text_len,
            });
        }

        self.gate.acquire()?;

        let message = Message::outgoing(
            conversation.clone(),
            self.config.user_id.clone(),
            text,
            Timestamp::now(),
        );
        let summary = SummaryUpdate::for_message(&message);
        let id = message.id;

        upsert_view(self.session(conversation).as_ref(), &message).await;
        self.persist_optimistic(&message).await;

        tracing::debug!("sending message {} to {}", id, conversation);
        self.remote_send_phase(message, summary).await?;
        Ok(id)
    }

    /// Re-run the remote phase of a failed send.
    ///
    /// A message not in the `Error` state is left alone.
    pub async fn retry_send(&self, id: &MessageId) -> Result<(), ChatError> {
        let current = self.load_message(id).await?;
        if current.status != DeliveryStatus::Error {
            tracing::debug!("retry ignored for {}: not in a failed state", id);
            return Ok(());
        }

        let mut message = current;
        message.status = DeliveryStatus::Sending;
        if let Err(e) = self.store.put_message(&message, false).await {
            tracing::warn!("durable write failed for {}: {}", message.id, e);
        }
        upsert_view(self.session(&message.conversation_id).as_ref(), &message).await;

        let summary = SummaryUpdate::for_message(&message);
        self.remote_send_phase(message, summary).await
    }

    /// Explicitly discard a failed send.
    pub async fn discard_failed(&self, id: &MessageId) -> Result<(), ChatError> {
        let current = self.load_message(id).await?;
        if current.status != DeliveryStatus::Error {
            tracing::debug!("discard ignored for {}: not in a failed state", id);
            return Ok(());
        }

        self.store.delete_message(id).await.map_err(storage_error)?;

        if let Some(session) = self.session(&current.conversation_id) {
            let mut view = session.view.lock().await;
            let before = view.len();
            view.retain(|m| m.id != *id);
            if view.len() != before {
                let _ = session.publisher.send(view.clone());
            }
        }
        Ok(())
    }

    /// Edit a message's text.
    ///
    /// Permitted only to the sender, within fifteen minutes of creation,
    /// and only while the message is not deleted; violations are
    /// rejected locally with no remote call. The edit applies
    /// optimistically and rolls back to the pre-edit message if the
    /// remote update fails.
    pub async fn edit_message(&self, id: &MessageId, new_text: &str) -> Result<(), ChatError> {
        let text = new_text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let len = text.chars().count();
        if len > self.config.max_text_len {
            return Err(ChatError::MessageTooLong {
                len,
                limit: self.config.max_text_len,
            });
        }

        let current = self.load_message(id).await?;
        let now = Timestamp::now();
        check_edit(&current, &self.config.user_id, now)?;

        let revision = edit_revision(&current, text, now);
        let update = FieldUpdate::Edit {
            text: text.to_string(),
            edited_at: now,
            edit_history: revision.updated().edit_history.clone(),
        };
        self.apply_revision(revision, update).await
    }

    /// Delete a message from the local user's view only.
    pub async fn delete_for_me(&self, id: &MessageId) -> Result<(), ChatError> {
        let current = self.load_message(id).await?;
        let revision = delete_for_revision(&current, &self.config.user_id);
        let update = FieldUpdate::DeletedBy(self.config.user_id.clone());
        self.apply_revision(revision, update).await
    }

    /// Delete a message for every participant.
    ///
    /// Sender-only and irreversible: the text becomes the tombstone
    /// placeholder while the row survives for ordering and identity.
    /// Rolls back if the remote update fails.
    pub async fn delete_for_everyone(&self, id: &MessageId) -> Result<(), ChatError> {
        let current = self.load_message(id).await?;
        check_delete_for_everyone(&current, &self.config.user_id)?;

        let revision = tombstone_revision(&current);
        self.apply_revision(revision, FieldUpdate::Tombstone).await
    }

    /// Mark every qualifying message in a conversation as delivered to
    /// the local user.
    ///
    /// Returns how many messages were marked; zero means no remote call
    /// was made.
    pub async fn mark_delivered(&self, conversation: &ConversationId) -> Result<u32, ChatError> {
        self.mark(conversation, AckKind::Delivered).await
    }

    /// Mark every qualifying message in a conversation as read by the
    /// local user. Read implies delivered.
    pub async fn mark_read(&self, conversation: &ConversationId) -> Result<u32, ChatError> {
        self.mark(conversation, AckKind::Read).await
    }

    /// Page older history from the local replica into the merged view.
    ///
    /// Older messages form an append-only cache outside the live-merge
    /// window: capped remote snapshots never evict them. Returns the
    /// number of messages added; a conversation that is not open yields
    /// zero.
    pub async fn load_older(
        &self,
        conversation: &ConversationId,
        limit: u32,
    ) -> Result<u32, ChatError> {
        let Some(session) = self.session(conversation) else {
            return Ok(0);
        };

        let mut view = session.view.lock().await;
        let before = view
            .first()
            .map(|m| m.created_at)
            .unwrap_or_else(Timestamp::now);
        let older = self
            .store
            .messages_before(conversation, before, limit)
            .await
            .map_err(storage_error)?;

        let mut added = 0u32;
        for msg in older {
            if !view.iter().any(|m| m.id == msg.id) {
                view.push(msg);
                added += 1;
            }
        }
        if added > 0 {
            view.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            let _ = session.publisher.send(view.clone());
        }
        Ok(added)
    }

    /// Open the conversation list: hydrate from the local replica, then
    /// follow the remote list.
    pub async fn open_inbox(&self) -> Result<InboxHandle, ChatError> {
        let user = self.config.user_id.clone();
        let initial = self
            .store
            .conversations_for(&user)
            .await
            .map_err(storage_error)?;
        let (publisher, receiver) = watch::channel(initial);
        let publisher = Arc::new(publisher);

        match self.feed.subscribe_conversations(&user).await {
            Ok(subscription) => {
                let ctx = InboxContext {
                    store: Arc::clone(&self.store),
                    publisher,
                };
                let task = tokio::spawn(run_inbox(ctx, subscription, self.config.debounce));
                if let Some(previous) = self.inbox_task.lock().unwrap().replace(task) {
                    previous.abort();
                }
            }
            Err(e) => {
                tracing::warn!(
                    "could not attach to conversation list: {} (serving local replica)",
                    e
                );
            }
        }

        Ok(InboxHandle { receiver })
    }

    /// Detach every session and the inbox. The local replica is retained.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.value().abort();
        }
        self.sessions.clear();
        if let Some(task) = self.inbox_task.lock().unwrap().take() {
            task.abort();
        }
        tracing::debug!("client shut down");
    }

    fn session(&self, conversation: &ConversationId) -> Option<Arc<ConversationSession>> {
        self.sessions.get(conversation).map(|e| Arc::clone(e.value()))
    }

    async fn load_message(&self, id: &MessageId) -> Result<Message, ChatError> {
        self.store
            .message(id)
            .await
            .map_err(storage_error)?
            .ok_or(ChatError::NotFound(*id))
    }

    /// Durable write for an optimistic insert. A failure is logged and
    /// re-attempted in the background; the in-memory view is the source
    /// of truth either way.
    async fn persist_optimistic(&self, message: &Message) {
        if let Err(e) = self.store.put_message(message, false).await {
            tracing::warn!(
                "optimistic durable write failed for {}: {}; retrying in background",
                message.id,
                e
            );
            let store = Arc::clone(&self.store);
            let message = message.clone();
            let delay = self.config.retry.delay_for(1);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = store.put_message(&message, false).await {
                    tracing::error!("durable write retry failed for {}: {}", message.id, e);
                }
            });
        }
    }

    /// The remote half of the send pipeline: the atomic dual write with
    /// retry and timeout, in its own task so that neither detaching the
    /// conversation nor dropping the caller cancels it. The resulting
    /// status lands in the local store even if no one is listening.
    async fn remote_send_phase(
        &self,
        message: Message,
        summary: SummaryUpdate,
    ) -> Result<(), ChatError> {
        let feed = Arc::clone(&self.feed);
        let store = Arc::clone(&self.store);
        let session = self.session(&message.conversation_id);
        let policy = self.config.retry.clone();
        let send_timeout = self.config.send_timeout;

        let task: JoinHandle<Result<(), ChatError>> = tokio::spawn(async move {
            let id = message.id;
            let attempt = tokio::time::timeout(
                send_timeout,
                with_retry(&policy, || {
                    let feed = Arc::clone(&feed);
                    let message = message.clone();
                    let summary = summary.clone();
                    async move { feed.write_message(&message, &summary).await }
                }),
            )
            .await;

            let outcome = match attempt {
                Ok(result) => result,
                Err(_) => Err(FeedError::Timeout),
            };

            match outcome {
                Ok(()) => {
                    finalize_status(&store, session.as_ref(), id, DeliveryStatus::Sent, true)
                        .await;
                    tracing::debug!("message {} confirmed by remote", id);
                    Ok(())
                }
                Err(e) => {
                    tracing::warn!("send failed for {}: {}", id, e);
                    finalize_status(&store, session.as_ref(), id, DeliveryStatus::Error, false)
                        .await;
                    Err(ChatError::RemoteWrite(e.to_string()))
                }
            }
        });

        task.await
            .map_err(|e| ChatError::RemoteWrite(format!("send task failed: {e}")))?
    }

    /// Optimistic apply + remote update + rollback-on-failure for edit
    /// and delete. Runs the remote phase in its own task so the mutation
    /// settles (or rolls back) even if the caller goes away.
    async fn apply_revision(
        &self,
        revision: Revision,
        update: FieldUpdate,
    ) -> Result<(), ChatError> {
        let updated = revision.updated().clone();
        let conversation = updated.conversation_id.clone();
        let session = self.session(&conversation);

        if let Err(e) = self.store.put_message(&updated, false).await {
            tracing::warn!("optimistic durable write failed for {}: {}", updated.id, e);
        }
        upsert_view(session.as_ref(), &updated).await;

        let feed = Arc::clone(&self.feed);
        let store = Arc::clone(&self.store);
        let policy = self.config.retry.clone();

        let task: JoinHandle<Result<(), ChatError>> = tokio::spawn(async move {
            let result = with_retry(&policy, || {
                let feed = Arc::clone(&feed);
                let conversation = conversation.clone();
                let update = update.clone();
                let targets = [updated.id];
                async move { feed.batch_update(&conversation, &targets, update).await }
            })
            .await;

            match result {
                Ok(_) => {
                    if let Err(e) = store.put_message(&updated, true).await {
                        tracing::warn!("durable write failed for {}: {}", updated.id, e);
                    }
                    Ok(())
                }
                Err(e) => {
                    let prior = revision.undo();
                    tracing::warn!("remote update failed for {}: {}; rolling back", prior.id, e);
                    if let Err(err) = store.put_message(&prior, true).await {
                        tracing::warn!("rollback durable write failed for {}: {}", prior.id, err);
                    }
                    upsert_view(session.as_ref(), &prior).await;
                    Err(ChatError::RemoteWrite(e.to_string()))
                }
            }
        });

        task.await
            .map_err(|e| ChatError::RemoteWrite(format!("update task failed: {e}")))?
    }

    /// Batch receipt marking: plan locally, one remote batch, then the
    /// same acks applied to the store and the view.
    async fn mark(&self, conversation: &ConversationId, kind: AckKind) -> Result<u32, ChatError> {
        let user = self.config.user_id.clone();
        let messages = match self.session(conversation) {
            Some(session) => session.view.lock().await.clone(),
            None => self
                .store
                .messages(conversation)
                .await
                .map_err(storage_error)?,
        };

        let targets = plan_acks(&messages, &user, kind);
        if targets.is_empty() {
            return Ok(0);
        }

        let feed = Arc::clone(&self.feed);
        with_retry(&self.config.retry, || {
            let feed = Arc::clone(&feed);
            let conversation = conversation.clone();
            let targets = targets.clone();
            let user = user.clone();
            async move {
                feed.batch_update(&conversation, &targets, FieldUpdate::Ack { user, kind })
                    .await
            }
        })
        .await
        .map_err(|e| ChatError::RemoteWrite(e.to_string()))?;

        self.store
            .apply_acks(&targets, &user, kind)
            .await
            .map_err(storage_error)?;

        if let Some(session) = self.session(conversation) {
            let mut view = session.view.lock().await;
            let mut changed = false;
            for msg in view.iter_mut() {
                if targets.contains(&msg.id) {
                    changed |= msg.apply_ack(&user, kind);
                }
            }
            if changed {
                let _ = session.publisher.send(view.clone());
            }
        }

        tracing::debug!("{} messages marked in {}", targets.len(), conversation);
        Ok(targets.len() as u32)
    }
}

fn storage_error(e: StoreError) -> ChatError {
    ChatError::Storage(e.to_string())
}

/// Replace-or-insert a message in a session's view and publish.
async fn upsert_view(session: Option<&Arc<ConversationSession>>, message: &Message) {
    let Some(session) = session else { return };
    let mut view = session.view.lock().await;
    match view.iter_mut().find(|m| m.id == message.id) {
        Some(slot) => *slot = message.clone(),
        None => view.push(message.clone()),
    }
    view.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
    let _ = session.publisher.send(view.clone());
}

/// Apply a send outcome to the store and the view.
///
/// Statuses merge monotonically, so a confirmation that raced with an
/// already-arrived snapshot never regresses the message.
async fn finalize_status(
    store: &Arc<dyn LocalStore>,
    session: Option<&Arc<ConversationSession>>,
    id: MessageId,
    status: DeliveryStatus,
    synced: bool,
) {
    if let Err(e) = store.update_status(&id, status, synced).await {
        tracing::warn!("status update failed for {}: {}", id, e);
    }
    if let Some(session) = session {
        let mut view = session.view.lock().await;
        if let Some(msg) = view.iter_mut().find(|m| m.id == id) {
            msg.status = DeliveryStatus::merge(msg.status, status);
            let _ = session.publisher.send(view.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MockFeed;
    use crate::notify::RecordingNotifier;
    use chat_core::display_status;
    use chat_store::SqliteStore;
    use chat_types::DELETED_TEXT;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    fn bob() -> UserId {
        UserId::new("bob")
    }

    fn permissive_limits() -> SendLimits {
        SendLimits {
            min_interval: Duration::ZERO,
            max_per_minute: 10_000,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            base: Duration::from_millis(10),
            cap: Duration::from_millis(50),
            max_jitter: Duration::ZERO,
        }
    }

    struct Fixture {
        client: ChatClient<MockFeed>,
        feed: MockFeed,
        notifier: RecordingNotifier,
        store: Arc<SqliteStore>,
        conversation: Conversation,
    }

    async fn fixture_with(config: ChatConfig) -> Fixture {
        init_tracing();
        let conversation =
            Conversation::direct(&alice(), &bob(), Timestamp::from_millis(1)).unwrap();
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let feed = MockFeed::new();
        let notifier = RecordingNotifier::new();
        let client = ChatClient::new(
            config,
            feed.clone(),
            store.clone(),
            Arc::new(notifier.clone()),
        );
        Fixture {
            client,
            feed,
            notifier,
            store,
            conversation,
        }
    }

    async fn fixture_for(user: UserId) -> Fixture {
        fixture_with(
            ChatConfig::new(user)
                .with_limits(permissive_limits())
                .with_retry(fast_retry())
                .with_debounce(Duration::from_millis(20)),
        )
        .await
    }

    async fn fixture() -> Fixture {
        fixture_for(alice()).await
    }

    fn inbound(conversation: &Conversation, sender: &UserId, text: &str, at: u64) -> Message {
        let mut msg = Message::outgoing(
            conversation.id.clone(),
            sender.clone(),
            text,
            Timestamp::from_millis(at),
        );
        msg.status = DeliveryStatus::Sent;
        msg
    }

    /// Let the session's debounced merge pass run (paused-time tests).
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // ===========================================
    // Send Pipeline Tests
    // ===========================================

    #[tokio::test]
    async fn send_confirms_and_persists() {
        let fx = fixture().await;
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();

        let id = fx.client.send(&fx.conversation.id, "hello").await.unwrap();

        let current = view.current();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, id);
        assert_eq!(current[0].status, DeliveryStatus::Sent);

        let stored = fx.store.message(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);

        let writes = fx.feed.dual_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0.id, id);
        assert_eq!(writes[0].1.last_message_text, "hello");
    }

    #[tokio::test]
    async fn send_trims_whitespace() {
        let fx = fixture().await;
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();

        fx.client.send(&fx.conversation.id, "  hi  ").await.unwrap();

        assert_eq!(view.current()[0].text, "hi");
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_side_effects() {
        let fx = fixture().await;
        fx.client.open_conversation(&fx.conversation).await.unwrap();

        let err = fx.client.send(&fx.conversation.id, "   ").await.unwrap_err();

        assert!(matches!(err, ChatError::EmptyMessage));
        assert!(fx.feed.dual_writes().is_empty());
        assert!(fx
            .store
            .messages(&fx.conversation.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn oversized_text_is_rejected() {
        let fx = fixture().await;
        let text = "x".repeat(5_000);

        let err = fx.client.send(&fx.conversation.id, &text).await.unwrap_err();

        assert!(matches!(
            err,
            ChatError::MessageTooLong {
                len: 5_000,
                limit: 4096
            }
        ));
        assert!(fx.feed.dual_writes().is_empty());
    }

    #[tokio::test]
    async fn failed_send_parks_at_error_and_stays_visible() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.feed.fail_next_write(FeedError::Unavailable("offline".into()));
        fx.feed.fail_next_write(FeedError::Unavailable("offline".into()));

        let err = fx.client.send(&fx.conversation.id, "hello").await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteWrite(_)));

        // Never silently vanish a composed message.
        let current = view.current();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].status, DeliveryStatus::Error);

        let pending = fx.store.pending_messages().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, DeliveryStatus::Error);
    }

    #[tokio::test]
    async fn permission_failure_is_not_retried() {
        let fx = fixture().await;
        fx.feed
            .fail_next_write(FeedError::PermissionDenied("blocked".into()));

        let err = fx.client.send(&fx.conversation.id, "hello").await.unwrap_err();

        assert!(matches!(err, ChatError::RemoteWrite(_)));
        // Had a retry happened, the second attempt would have succeeded
        // and recorded a dual write.
        assert!(fx.feed.dual_writes().is_empty());
    }

    #[tokio::test]
    async fn offline_send_retries_to_sent_then_delivered() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.feed.fail_next_write(FeedError::Unavailable("offline".into()));
        fx.feed.fail_next_write(FeedError::Unavailable("offline".into()));

        fx.client.send(&fx.conversation.id, "hello").await.unwrap_err();
        let id = view.current()[0].id;
        assert_eq!(view.current()[0].status, DeliveryStatus::Error);

        // Reconnected: manual retry succeeds.
        fx.client.retry_send(&id).await.unwrap();
        assert_eq!(view.current()[0].status, DeliveryStatus::Sent);
        assert_eq!(fx.feed.dual_writes().len(), 1);

        // The recipient's delivered mark arrives via snapshot.
        let mut confirmed = view.current()[0].clone();
        confirmed.apply_ack(&bob(), AckKind::Delivered);
        fx.feed.push_snapshot(&fx.conversation.id, vec![confirmed]);
        settle().await;

        let others = fx.conversation.others(&alice());
        assert_eq!(
            display_status(&view.current()[0], &others),
            DeliveryStatus::Delivered
        );
    }

    #[tokio::test]
    async fn retry_of_confirmed_send_is_a_no_op() {
        let fx = fixture().await;
        fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "hello").await.unwrap();

        fx.client.retry_send(&id).await.unwrap();

        assert_eq!(fx.feed.dual_writes().len(), 1);
    }

    #[tokio::test]
    async fn discard_removes_failed_message() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.feed.fail_next_write(FeedError::Timeout);
        fx.feed.fail_next_write(FeedError::Timeout);

        fx.client.send(&fx.conversation.id, "oops").await.unwrap_err();
        let id = view.current()[0].id;

        fx.client.discard_failed(&id).await.unwrap();

        assert!(view.current().is_empty());
        assert!(fx.store.message(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rapid_sends_are_rate_limited() {
        let fx = fixture_with(
            ChatConfig::new(alice())
                .with_retry(fast_retry())
                .with_limits(SendLimits {
                    min_interval: Duration::from_secs(10),
                    max_per_minute: 30,
                }),
        )
        .await;

        fx.client.send(&fx.conversation.id, "first").await.unwrap();
        let err = fx.client.send(&fx.conversation.id, "second").await.unwrap_err();

        assert!(matches!(err, ChatError::RateLimited { .. }));
        assert_eq!(fx.feed.dual_writes().len(), 1);
    }

    // ===========================================
    // Merge & Snapshot Tests
    // ===========================================

    #[tokio::test]
    async fn remote_confirmation_deduplicates() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "hello").await.unwrap();

        let confirmed = view.current()[0].clone();
        fx.feed.push_snapshot(&fx.conversation.id, vec![confirmed]);
        settle().await;

        let current = view.current();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, id);
        assert_eq!(current[0].status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn stale_snapshot_keeps_failed_send_visible() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.feed.fail_next_write(FeedError::Unavailable("offline".into()));
        fx.feed.fail_next_write(FeedError::Unavailable("offline".into()));
        fx.client.send(&fx.conversation.id, "mine").await.unwrap_err();

        // A stale snapshot that predates the send.
        fx.feed.push_snapshot(
            &fx.conversation.id,
            vec![inbound(&fx.conversation, &bob(), "older", 50)],
        );
        settle().await;

        let current = view.current();
        assert_eq!(current.len(), 2);
        assert!(current
            .iter()
            .any(|m| m.status == DeliveryStatus::Error && m.text == "mine"));
    }

    #[tokio::test]
    async fn status_progresses_sent_delivered_read() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.client.send(&fx.conversation.id, "m").await.unwrap();
        let others = fx.conversation.others(&alice());

        let mut observed = vec![display_status(&view.current()[0], &others)];

        let mut remote = view.current()[0].clone();
        remote.apply_ack(&bob(), AckKind::Delivered);
        fx.feed.push_snapshot(&fx.conversation.id, vec![remote.clone()]);
        settle().await;
        observed.push(display_status(&view.current()[0], &others));

        remote.apply_ack(&bob(), AckKind::Read);
        fx.feed.push_snapshot(&fx.conversation.id, vec![remote]);
        settle().await;
        observed.push(display_status(&view.current()[0], &others));

        // No intermediate state skipped, no regression.
        assert_eq!(
            observed,
            vec![
                DeliveryStatus::Sent,
                DeliveryStatus::Delivered,
                DeliveryStatus::Read
            ]
        );
    }

    // ===========================================
    // Status Tracker Tests
    // ===========================================

    #[tokio::test]
    async fn mark_read_batches_and_skips_marked() {
        let fx = fixture_for(bob()).await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.feed.push_snapshot(
            &fx.conversation.id,
            vec![
                inbound(&fx.conversation, &alice(), "one", 100),
                inbound(&fx.conversation, &alice(), "two", 200),
            ],
        );
        settle().await;

        let marked = fx.client.mark_read(&fx.conversation.id).await.unwrap();
        assert_eq!(marked, 2);

        // One batched remote call covering both messages.
        let patches = fx.feed.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].targets.len(), 2);
        assert!(matches!(
            patches[0].update,
            FieldUpdate::Ack {
                kind: AckKind::Read,
                ..
            }
        ));

        // Read implies delivered, in the view and in the store.
        for msg in view.current() {
            assert!(msg.read_by.contains(&bob()));
            assert!(msg.delivered_to.contains(&bob()));
        }
        for msg in fx.store.messages(&fx.conversation.id).await.unwrap() {
            assert!(msg.read_by.contains(&bob()));
        }

        // Nothing qualifies any more: no further remote call.
        assert_eq!(fx.client.mark_read(&fx.conversation.id).await.unwrap(), 0);
        assert_eq!(fx.feed.patches().len(), 1);
    }

    #[tokio::test]
    async fn mark_delivered_skips_own_messages() {
        let fx = fixture_for(bob()).await;
        tokio::time::pause();
        fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.feed.push_snapshot(
            &fx.conversation.id,
            vec![
                inbound(&fx.conversation, &alice(), "theirs", 100),
                inbound(&fx.conversation, &bob(), "mine", 200),
            ],
        );
        settle().await;

        let marked = fx.client.mark_delivered(&fx.conversation.id).await.unwrap();

        assert_eq!(marked, 1);
        let patches = fx.feed.patches();
        assert_eq!(patches[0].targets.len(), 1);
    }

    // ===========================================
    // Edit Tests
    // ===========================================

    #[tokio::test]
    async fn edit_within_window_succeeds() {
        let fx = fixture().await;
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "original").await.unwrap();

        fx.client.edit_message(&id, "edited").await.unwrap();

        let msg = &view.current()[0];
        assert_eq!(msg.text, "edited");
        assert_eq!(msg.edit_history, vec!["original".to_string()]);
        assert!(msg.edited_at.is_some());

        let patches = fx.feed.patches();
        assert_eq!(patches.len(), 1);
        assert!(matches!(patches[0].update, FieldUpdate::Edit { .. }));
    }

    #[tokio::test]
    async fn edit_window_boundary() {
        let fx = fixture().await;
        let now = Timestamp::now().as_millis();

        // 14m59s old: allowed.
        let mut recent = Message::outgoing(
            fx.conversation.id.clone(),
            alice(),
            "recent",
            Timestamp::from_millis(now - (14 * 60 + 59) * 1_000),
        );
        recent.status = DeliveryStatus::Sent;
        fx.store.put_message(&recent, true).await.unwrap();
        fx.client.edit_message(&recent.id, "edited").await.unwrap();

        // 15m01s old: rejected locally, no remote call.
        let mut stale = Message::outgoing(
            fx.conversation.id.clone(),
            alice(),
            "stale",
            Timestamp::from_millis(now - (15 * 60 + 1) * 1_000),
        );
        stale.status = DeliveryStatus::Sent;
        fx.store.put_message(&stale, true).await.unwrap();
        let patches_before = fx.feed.patches().len();

        let err = fx.client.edit_message(&stale.id, "too late").await.unwrap_err();

        assert!(matches!(err, ChatError::EditWindowElapsed));
        assert_eq!(fx.feed.patches().len(), patches_before);
    }

    #[tokio::test]
    async fn edit_by_non_sender_is_rejected_locally() {
        let fx = fixture().await;
        let theirs = inbound(&fx.conversation, &bob(), "theirs", 100);
        fx.store.put_message(&theirs, true).await.unwrap();

        let err = fx.client.edit_message(&theirs.id, "hijack").await.unwrap_err();

        assert!(matches!(err, ChatError::NotSender { .. }));
        assert!(fx.feed.patches().is_empty());
    }

    #[tokio::test]
    async fn edit_of_missing_message_is_not_found() {
        let fx = fixture().await;
        let err = fx
            .client
            .edit_message(&MessageId::new(), "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn edit_rolls_back_on_remote_failure() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "original").await.unwrap();

        fx.feed.fail_next_patch(FeedError::Unavailable("down".into()));
        fx.feed.fail_next_patch(FeedError::Unavailable("down".into()));

        let err = fx.client.edit_message(&id, "edited").await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteWrite(_)));

        // Restored to the exact pre-edit message.
        let msg = &view.current()[0];
        assert_eq!(msg.text, "original");
        assert!(msg.edit_history.is_empty());
        assert!(msg.edited_at.is_none());

        let stored = fx.store.message(&id).await.unwrap().unwrap();
        assert_eq!(stored.text, "original");
    }

    // ===========================================
    // Delete Tests
    // ===========================================

    #[tokio::test]
    async fn delete_for_everyone_tombstones_in_place() {
        let fx = fixture().await;
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "secret").await.unwrap();

        fx.client.delete_for_everyone(&id).await.unwrap();

        // The row survives for ordering; only its content is replaced.
        let current = view.current();
        assert_eq!(current.len(), 1);
        assert!(current[0].deleted_for_everyone);
        assert_eq!(current[0].text, DELETED_TEXT);

        let patches = fx.feed.patches();
        assert_eq!(patches.len(), 1);
        assert!(matches!(patches[0].update, FieldUpdate::Tombstone));

        let stored = fx.store.message(&id).await.unwrap().unwrap();
        assert_eq!(stored.text, DELETED_TEXT);
    }

    #[tokio::test]
    async fn delete_for_everyone_by_non_sender_is_rejected() {
        let fx = fixture().await;
        let theirs = inbound(&fx.conversation, &bob(), "theirs", 100);
        fx.store.put_message(&theirs, true).await.unwrap();

        let err = fx.client.delete_for_everyone(&theirs.id).await.unwrap_err();

        assert!(matches!(err, ChatError::NotSender { .. }));
        assert!(fx.feed.patches().is_empty());
    }

    #[tokio::test]
    async fn delete_for_me_records_per_user_tombstone() {
        let fx = fixture().await;
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "keep text").await.unwrap();

        fx.client.delete_for_me(&id).await.unwrap();

        let msg = &view.current()[0];
        assert!(msg.deleted_by.contains(&alice()));
        assert!(!msg.deleted_for_everyone);
        assert_eq!(msg.text, "keep text");
        assert!(msg.is_deleted_for(&alice()));
        assert!(!msg.is_deleted_for(&bob()));

        let patches = fx.feed.patches();
        assert!(matches!(patches[0].update, FieldUpdate::DeletedBy(_)));
    }

    #[tokio::test]
    async fn delete_rolls_back_on_remote_failure() {
        let fx = fixture().await;
        tokio::time::pause();
        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        let id = fx.client.send(&fx.conversation.id, "secret").await.unwrap();

        fx.feed.fail_next_patch(FeedError::Timeout);
        fx.feed.fail_next_patch(FeedError::Timeout);

        let err = fx.client.delete_for_everyone(&id).await.unwrap_err();
        assert!(matches!(err, ChatError::RemoteWrite(_)));

        let msg = &view.current()[0];
        assert!(!msg.deleted_for_everyone);
        assert_eq!(msg.text, "secret");
    }

    // ===========================================
    // Coordinator Tests
    // ===========================================

    #[tokio::test]
    async fn open_serves_local_replica_before_any_snapshot() {
        let fx = fixture().await;
        let cached = inbound(&fx.conversation, &bob(), "cached", 100);
        fx.store.put_message(&cached, true).await.unwrap();

        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();

        assert_eq!(view.current(), vec![cached]);
    }

    #[tokio::test]
    async fn open_twice_shares_one_subscription() {
        let fx = fixture().await;
        fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.client.open_conversation(&fx.conversation).await.unwrap();

        assert_eq!(fx.feed.subscriber_count(&fx.conversation.id), 1);
    }

    #[tokio::test]
    async fn close_detaches_the_remote_listener() {
        let fx = fixture().await;
        fx.client.open_conversation(&fx.conversation).await.unwrap();
        assert_eq!(fx.feed.subscriber_count(&fx.conversation.id), 1);

        fx.client.close_conversation(&fx.conversation.id);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(fx.feed.subscriber_count(&fx.conversation.id), 0);
    }

    #[tokio::test]
    async fn send_completes_after_close() {
        let fx = fixture().await;
        tokio::time::pause();
        fx.client.open_conversation(&fx.conversation).await.unwrap();

        // Detach does not cancel the in-flight send; the status still
        // lands in the local store.
        let send = fx.client.send(&fx.conversation.id, "parting");
        fx.client.close_conversation(&fx.conversation.id);
        let id = send.await.unwrap();

        let stored = fx.store.message(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn hydration_caps_and_load_older_pages() {
        let fx = fixture_with(
            ChatConfig::new(alice())
                .with_limits(permissive_limits())
                .with_retry(fast_retry())
                .with_hydrate_limit(3),
        )
        .await;
        for i in 1..=5u64 {
            let msg = inbound(&fx.conversation, &bob(), &format!("m{i}"), i * 100);
            fx.store.put_message(&msg, true).await.unwrap();
        }

        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        assert_eq!(view.current().len(), 3);
        assert_eq!(view.current()[0].text, "m3");

        let added = fx.client.load_older(&fx.conversation.id, 10).await.unwrap();
        assert_eq!(added, 2);
        assert_eq!(view.current().len(), 5);
        assert_eq!(view.current()[0].text, "m1");
    }

    #[tokio::test]
    async fn older_history_survives_capped_snapshots() {
        let fx = fixture_with(
            ChatConfig::new(alice())
                .with_limits(permissive_limits())
                .with_retry(fast_retry())
                .with_debounce(Duration::from_millis(20))
                .with_hydrate_limit(2),
        )
        .await;
        tokio::time::pause();
        for i in 1..=4u64 {
            let msg = inbound(&fx.conversation, &bob(), &format!("m{i}"), i * 100);
            fx.store.put_message(&msg, true).await.unwrap();
        }

        let view = fx.client.open_conversation(&fx.conversation).await.unwrap();
        fx.client.load_older(&fx.conversation.id, 10).await.unwrap();
        assert_eq!(view.current().len(), 4);

        // A capped snapshot covering only the recent window must not
        // evict the paged-in history.
        fx.feed.push_snapshot(
            &fx.conversation.id,
            vec![
                inbound(&fx.conversation, &bob(), "m4", 400),
                inbound(&fx.conversation, &bob(), "m5", 500),
            ],
        );
        settle().await;

        let texts: Vec<String> = view.current().into_iter().map(|m| m.text).collect();
        assert!(texts.contains(&"m1".to_string()));
        assert!(texts.contains(&"m5".to_string()));
    }

    #[tokio::test]
    async fn focused_conversation_suppresses_notifications() {
        let fx = fixture().await;
        tokio::time::pause();
        fx.client.open_conversation(&fx.conversation).await.unwrap();

        fx.client.set_focus(Some(fx.conversation.id.clone()));
        fx.feed.push_snapshot(
            &fx.conversation.id,
            vec![inbound(&fx.conversation, &bob(), "seen live", 100)],
        );
        settle().await;
        assert!(fx.notifier.notices().is_empty());

        fx.client.set_focus(None);
        fx.feed.push_snapshot(
            &fx.conversation.id,
            vec![
                inbound(&fx.conversation, &bob(), "seen live", 100),
                inbound(&fx.conversation, &bob(), "missed", 200),
            ],
        );
        settle().await;

        let notices = fx.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].text, "missed");
    }

    // ===========================================
    // Inbox Tests
    // ===========================================

    #[tokio::test]
    async fn inbox_hydrates_and_follows_remote_list() {
        let fx = fixture().await;
        tokio::time::pause();
        fx.store.put_conversation(&fx.conversation, true).await.unwrap();

        let inbox = fx.client.open_inbox().await.unwrap();
        assert_eq!(inbox.current().len(), 1);

        let mut updated_direct = fx.conversation.clone();
        updated_direct.last_message_at = Some(Timestamp::from_millis(100));
        let mut group = Conversation::group(
            &[alice(), bob(), UserId::new("carol")],
            Timestamp::from_millis(5),
        )
        .unwrap();
        group.last_message_at = Some(Timestamp::from_millis(200));

        fx.feed
            .push_conversations(&alice(), vec![updated_direct, group.clone()]);
        settle().await;

        let list = inbox.current();
        assert_eq!(list.len(), 2);
        // Most recent activity first.
        assert_eq!(list[0].id, group.id);

        // Snapshot persisted to the local replica.
        assert_eq!(
            fx.store.conversations_for(&alice()).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn ensure_conversation_is_idempotent() {
        let fx = fixture().await;

        fx.client.ensure_conversation(&fx.conversation).await.unwrap();
        fx.client.ensure_conversation(&fx.conversation).await.unwrap();

        assert_eq!(
            fx.store.conversations_for(&alice()).await.unwrap().len(),
            1
        );

        // A synced summary is not clobbered by re-registration.
        let mut with_summary = fx.conversation.clone();
        with_summary.last_message_text = Some("latest".into());
        with_summary.last_message_at = Some(Timestamp::from_millis(900));
        fx.store.put_conversation(&with_summary, true).await.unwrap();

        fx.client.ensure_conversation(&fx.conversation).await.unwrap();

        let stored = fx
            .store
            .conversation(&fx.conversation.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_message_text.as_deref(), Some("latest"));
    }
}
