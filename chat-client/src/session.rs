//! Per-conversation synchronization sessions.
//!
//! Each open conversation gets one session: a single-writer task that
//! receives remote snapshots, coalesces bursts behind a short debounce
//! window, merges them against the current view and the locally pending
//! sends, persists what changed, and publishes the result through a
//! `watch` channel. All mutations of a conversation's view are serialized
//! through the session's async mutex; different conversations proceed in
//! parallel.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use chat_core::{merge_snapshot, CoalescingSlot, MergeOutcome, RetryPolicy};
use chat_store::LocalStore;
use chat_types::{Conversation, ConversationId, Message, UserId};

use crate::feed::Subscription;
use crate::notify::{NewMessageNotice, Notifier};

/// A live, read-only handle onto a conversation's merged view.
///
/// The view is ordered by `(created_at, id)` and deduplicated. It updates
/// whenever a merge pass changes something; identical snapshots produce no
/// wake-ups.
pub struct ViewHandle {
    receiver: watch::Receiver<Vec<Message>>,
}

impl ViewHandle {
    pub(crate) fn new(receiver: watch::Receiver<Vec<Message>>) -> Self {
        Self { receiver }
    }

    /// The current merged view.
    pub fn current(&self) -> Vec<Message> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next published change.
    ///
    /// Returns `false` once the conversation is closed.
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

/// State owned per open conversation.
pub(crate) struct ConversationSession {
    /// The merged view; the single-writer lock for this conversation.
    pub(crate) view: Arc<AsyncMutex<Vec<Message>>>,
    pub(crate) publisher: Arc<watch::Sender<Vec<Message>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl ConversationSession {
    pub(crate) fn new(
        view: Arc<AsyncMutex<Vec<Message>>>,
        publisher: Arc<watch::Sender<Vec<Message>>>,
    ) -> Self {
        Self {
            view,
            publisher,
            task: StdMutex::new(None),
        }
    }

    pub(crate) fn attach_task(&self, handle: JoinHandle<()>) {
        *self.task.lock().unwrap() = Some(handle);
    }

    pub(crate) fn subscribe_view(&self) -> ViewHandle {
        ViewHandle::new(self.publisher.subscribe())
    }

    /// Detach: abort the merge loop, cancelling any pending debounce.
    pub(crate) fn abort(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

/// Everything the session task needs, cheap to clone.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) local_user: UserId,
    pub(crate) conversation: Conversation,
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) focus: Arc<StdMutex<Option<ConversationId>>>,
    pub(crate) view: Arc<AsyncMutex<Vec<Message>>>,
    pub(crate) publisher: Arc<watch::Sender<Vec<Message>>>,
    pub(crate) retry: RetryPolicy,
}

fn far_future() -> tokio::time::Instant {
    tokio::time::Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// The session merge loop.
///
/// Snapshots land in a single-slot coalescing buffer; the first arrival
/// arms the debounce timer, later arrivals within the window replace the
/// pending value, and the timer expiry runs one merge pass over the
/// latest snapshot. A closed stream is "paused delivery": the last merged
/// view keeps being served.
pub(crate) async fn run_session(
    ctx: SessionContext,
    mut subscription: Subscription<Vec<Message>>,
    debounce: Duration,
) {
    let mut slot: CoalescingSlot<Vec<Message>> = CoalescingSlot::new();
    let timer = tokio::time::sleep_until(far_future());
    tokio::pin!(timer);

    loop {
        tokio::select! {
            maybe = subscription.next() => match maybe {
                Some(snapshot) => {
                    if slot.put(snapshot) {
                        timer.as_mut().reset(tokio::time::Instant::now() + debounce);
                    }
                }
                None => {
                    if let Some(snapshot) = slot.take() {
                        apply_snapshot(&ctx, snapshot).await;
                    }
                    tracing::debug!("snapshot stream ended for {}", ctx.conversation.id);
                    break;
                }
            },
            _ = &mut timer, if slot.is_armed() => {
                if let Some(snapshot) = slot.take() {
                    apply_snapshot(&ctx, snapshot).await;
                }
            }
        }
    }
}

/// One merge pass: merge, persist, notify, publish.
pub(crate) async fn apply_snapshot(ctx: &SessionContext, snapshot: Vec<Message>) {
    let mut view = ctx.view.lock().await;

    let pending: Vec<Message> = view
        .iter()
        .filter(|m| m.status.is_pending())
        .cloned()
        .collect();

    let outcome = merge_snapshot(&view, &snapshot, &pending);
    if !outcome.is_change() {
        return;
    }

    tracing::debug!(
        "merged snapshot for {}: {} new, {} changed",
        ctx.conversation.id,
        outcome.new_ids.len(),
        outcome.changed_ids.len()
    );

    persist_changes(ctx, &outcome).await;
    notify_inbound(ctx, &outcome);

    *view = outcome.view.clone();
    let _ = ctx.publisher.send(outcome.view);
}

/// Write new and changed rows to the local store.
///
/// A durable-write failure never drops the in-memory view; the write is
/// re-attempted once in the background and the failure logged.
async fn persist_changes(ctx: &SessionContext, outcome: &MergeOutcome) {
    for msg in &outcome.view {
        let touched =
            outcome.new_ids.contains(&msg.id) || outcome.changed_ids.contains(&msg.id);
        if !touched {
            continue;
        }
        let synced = !msg.status.is_pending();
        if let Err(e) = ctx.store.put_message(msg, synced).await {
            tracing::warn!(
                "durable write failed for {}: {}; view retained, retrying in background",
                msg.id,
                e
            );
            let store = Arc::clone(&ctx.store);
            let msg = msg.clone();
            let delay = ctx.retry.delay_for(1);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = store.put_message(&msg, synced).await {
                    tracing::error!("durable write retry failed for {}: {}", msg.id, e);
                }
            });
        }
    }
}

/// Fire the notifier for the most recent new inbound message.
///
/// Skipped for messages authored locally and while the conversation is in
/// foreground focus.
fn notify_inbound(ctx: &SessionContext, outcome: &MergeOutcome) {
    let focused = ctx.focus.lock().unwrap().as_ref() == Some(&ctx.conversation.id);
    if focused {
        return;
    }

    let latest = outcome
        .view
        .iter()
        .filter(|m| outcome.new_ids.contains(&m.id))
        .filter(|m| !m.is_from(&ctx.local_user))
        .max_by_key(|m| (m.created_at, m.id));

    if let Some(msg) = latest {
        ctx.notifier.notify(NewMessageNotice {
            conversation_id: ctx.conversation.id.clone(),
            sender_id: msg.sender_id.clone(),
            text: msg.text.clone(),
            is_group: ctx.conversation.is_group(),
        });
    }
}

/// Dependencies of the conversation-list (inbox) loop.
#[derive(Clone)]
pub(crate) struct InboxContext {
    pub(crate) store: Arc<dyn LocalStore>,
    pub(crate) publisher: Arc<watch::Sender<Vec<Conversation>>>,
}

/// The inbox loop: same coalescing discipline as [`run_session`], applied
/// to conversation-list snapshots.
pub(crate) async fn run_inbox(
    ctx: InboxContext,
    mut subscription: Subscription<Vec<Conversation>>,
    debounce: Duration,
) {
    let mut slot: CoalescingSlot<Vec<Conversation>> = CoalescingSlot::new();
    let timer = tokio::time::sleep_until(far_future());
    tokio::pin!(timer);

    loop {
        tokio::select! {
            maybe = subscription.next() => match maybe {
                Some(list) => {
                    if slot.put(list) {
                        timer.as_mut().reset(tokio::time::Instant::now() + debounce);
                    }
                }
                None => {
                    if let Some(list) = slot.take() {
                        apply_conversation_list(&ctx, list).await;
                    }
                    tracing::debug!("conversation-list stream ended");
                    break;
                }
            },
            _ = &mut timer, if slot.is_armed() => {
                if let Some(list) = slot.take() {
                    apply_conversation_list(&ctx, list).await;
                }
            }
        }
    }
}

/// Apply one conversation-list snapshot: sort, persist, publish on change.
pub(crate) async fn apply_conversation_list(ctx: &InboxContext, mut list: Vec<Conversation>) {
    list.sort_by(|a, b| {
        let ka = (a.last_message_at.unwrap_or(a.created_at), &a.id);
        let kb = (b.last_message_at.unwrap_or(b.created_at), &b.id);
        kb.cmp(&ka)
    });

    if *ctx.publisher.borrow() == list {
        return;
    }

    for conversation in &list {
        if let Err(e) = ctx.store.put_conversation(conversation, true).await {
            tracing::warn!("durable write failed for conversation {}: {}", conversation.id, e);
        }
    }

    let _ = ctx.publisher.send(list);
}
