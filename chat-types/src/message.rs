//! The message record and its delivery lifecycle.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::{ConversationId, MessageId, Timestamp, UserId};

/// Placeholder text shown for a message deleted for everyone.
pub const DELETED_TEXT: &str = "This message was deleted";

/// Delivery state of a message.
///
/// Transitions are monotonic (`Sending → Sent → Delivered → Read`) except
/// for [`DeliveryStatus::Error`], which is terminal-but-retriable: a failed
/// send parks at `Error` until it is retried or discarded, and a later
/// remote confirmation clears it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Optimistically inserted, remote write not yet confirmed.
    Sending,
    /// Accepted by the remote authority.
    Sent,
    /// In every other participant's `delivered_to` set.
    Delivered,
    /// In every other participant's `read_by` set.
    Read,
    /// Remote write failed after retries; awaiting retry or discard.
    Error,
}

impl DeliveryStatus {
    /// Position on the monotonic ladder. `Error` sits outside it.
    fn rank(self) -> u8 {
        match self {
            Self::Sending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Error => 0,
        }
    }

    /// Merge a locally-observed status with a remote one.
    ///
    /// The result never regresses on the monotonic ladder: the further
    /// status wins. `Error` is special-cased both ways: a local `Error` is
    /// cleared by any remote confirmation (the write evidently landed), and
    /// an explicit transition *into* `Error` is always allowed.
    pub fn merge(local: Self, remote: Self) -> Self {
        match (local, remote) {
            (Self::Error, r) => r,
            (_, Self::Error) => Self::Error,
            (l, r) if r.rank() >= l.rank() => r,
            (l, _) => l,
        }
    }

    /// String form used in storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Error => "error",
        }
    }

    /// Parse the storage-row string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether this message still counts as pending (unconfirmed).
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Sending | Self::Error)
    }
}

/// Which recipient-acknowledgement set a mark operation targets.
///
/// `Read` implies `Delivered`: a read-mark also adds the user to the
/// delivered set wherever it is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    /// The message reached the recipient's device.
    Delivered,
    /// The recipient viewed the message.
    Read,
}

/// A chat message.
///
/// The `id` is immutable and client-generated; everything else is mutable
/// state that the remote authority may overwrite on confirmation. The
/// acknowledgement sets grow only; `deleted_for_everyone` is irreversible
/// and replaces `text` with [`DELETED_TEXT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique, stable message identifier.
    pub id: MessageId,
    /// The conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// The author.
    pub sender_id: UserId,
    /// Message body (placeholder once tombstoned).
    pub text: String,
    /// Creation instant, client-assigned; authoritative value assigned by
    /// the remote on confirmation.
    pub created_at: Timestamp,
    /// Delivery state.
    pub status: DeliveryStatus,
    /// Recipients whose devices received the message.
    pub delivered_to: BTreeSet<UserId>,
    /// Recipients who viewed the message.
    pub read_by: BTreeSet<UserId>,
    /// Users who locally tombstoned the message ("delete for me").
    pub deleted_by: BTreeSet<UserId>,
    /// Sender-only, irreversible tombstone visible to all participants.
    pub deleted_for_everyone: bool,
    /// Set on first edit.
    pub edited_at: Option<Timestamp>,
    /// Prior texts, oldest first. Empty if never edited.
    pub edit_history: Vec<String>,
}

impl Message {
    /// Construct a new outgoing message in the `Sending` state.
    pub fn outgoing(
        conversation_id: ConversationId,
        sender_id: UserId,
        text: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            text: text.into(),
            created_at,
            status: DeliveryStatus::Sending,
            delivered_to: BTreeSet::new(),
            read_by: BTreeSet::new(),
            deleted_by: BTreeSet::new(),
            deleted_for_everyone: false,
            edited_at: None,
            edit_history: Vec::new(),
        }
    }

    /// Whether `user` authored this message.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// Whether `user` has locally deleted this message.
    pub fn is_deleted_for(&self, user: &UserId) -> bool {
        self.deleted_for_everyone || self.deleted_by.contains(user)
    }

    /// Add `user` to the acknowledgement set for `kind`.
    ///
    /// Read implies delivered. Returns `true` if any set actually grew.
    pub fn apply_ack(&mut self, user: &UserId, kind: AckKind) -> bool {
        let mut changed = self.delivered_to.insert(user.clone());
        if matches!(kind, AckKind::Read) {
            changed |= self.read_by.insert(user.clone());
        }
        changed
    }

    /// Tombstone this message for everyone.
    ///
    /// Replaces the text with [`DELETED_TEXT`]; the row survives for
    /// ordering and identity. Irreversible.
    pub fn tombstone(&mut self) {
        self.deleted_for_everyone = true;
        self.text = DELETED_TEXT.to_string();
    }
}
