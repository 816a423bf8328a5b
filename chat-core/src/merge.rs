//! Snapshot merging for chatsync.
//!
//! This module reconciles three views of a conversation into one:
//! - the previously merged view,
//! - a fresh remote snapshot (authoritative for every id it contains),
//! - the locally pending/error records not yet confirmed by the remote.
//!
//! The output is an ordered, deduplicated view plus a change signal, so
//! the caller only republishes (and only rewrites storage) when something
//! actually changed.

use std::collections::{HashMap, HashSet};

use chat_types::{DeliveryStatus, Message, MessageId, Timestamp};

/// Result of one merge pass.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The new merged view, sorted by `(created_at, id)`.
    pub view: Vec<Message>,
    /// Ids present in the new view but not in the previous one.
    pub new_ids: Vec<MessageId>,
    /// Ids present in both views whose status, delivery sets, text, or
    /// tombstone flags changed.
    pub changed_ids: Vec<MessageId>,
}

impl MergeOutcome {
    /// Whether this pass changed anything worth publishing.
    pub fn is_change(&self) -> bool {
        !self.new_ids.is_empty() || !self.changed_ids.is_empty()
    }
}

/// Merge a remote snapshot into the previous view.
///
/// Algorithm:
/// 1. The snapshot is authoritative for every id it contains, except that
///    statuses merge monotonically (a snapshot never regresses a message's
///    status; confirmation clears a local `Error`).
/// 2. Pending/error records absent from the snapshot are appended: a
///    stale snapshot must never drop an optimistic send.
/// 3. Previously confirmed messages older than the snapshot's oldest entry
///    are retained: a capped snapshot only speaks for its own window.
/// 4. Sort by `(created_at, id)`, deterministic across repeated merges.
/// 5. Diff against the previous view to produce the change signal.
pub fn merge_snapshot(
    previous: &[Message],
    snapshot: &[Message],
    pending: &[Message],
) -> MergeOutcome {
    let previous_by_id: HashMap<MessageId, &Message> =
        previous.iter().map(|m| (m.id, m)).collect();

    let mut seen: HashSet<MessageId> = HashSet::with_capacity(snapshot.len());
    let mut view: Vec<Message> = Vec::with_capacity(snapshot.len() + pending.len());

    // 1. Snapshot entries, with the monotonic status guard.
    for remote in snapshot {
        if !seen.insert(remote.id) {
            continue;
        }
        let mut merged = remote.clone();
        if let Some(prev) = previous_by_id.get(&remote.id) {
            merged.status = DeliveryStatus::merge(prev.status, remote.status);
        }
        view.push(merged);
    }

    // 2. Unconfirmed local records.
    for local in pending {
        if seen.insert(local.id) {
            view.push(local.clone());
        }
    }

    // 3. Confirmed messages that fell off a capped snapshot's window.
    let window_start: Option<Timestamp> = snapshot.iter().map(|m| m.created_at).min();
    for prev in previous {
        if seen.contains(&prev.id) {
            continue;
        }
        let outside_window = match window_start {
            Some(start) => prev.created_at < start,
            None => true,
        };
        if outside_window {
            seen.insert(prev.id);
            view.push(prev.clone());
        }
    }

    // 4. Deterministic order.
    view.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

    // 5. Change signal.
    let mut new_ids = Vec::new();
    let mut changed_ids = Vec::new();
    for msg in &view {
        match previous_by_id.get(&msg.id) {
            None => new_ids.push(msg.id),
            Some(prev) if fields_changed(prev, msg) => changed_ids.push(msg.id),
            Some(_) => {}
        }
    }

    MergeOutcome {
        view,
        new_ids,
        changed_ids,
    }
}

/// Field-level diff driving the change signal.
///
/// Covers status, the acknowledgement sets, and the content/tombstone
/// fields, so remote edits and deletes propagate to the published view.
/// Unrelated field churn produces no signal.
fn fields_changed(prev: &Message, next: &Message) -> bool {
    prev.status != next.status
        || prev.delivered_to != next.delivered_to
        || prev.read_by != next.read_by
        || prev.text != next.text
        || prev.edited_at != next.edited_at
        || prev.deleted_by != next.deleted_by
        || prev.deleted_for_everyone != next.deleted_for_everyone
}
