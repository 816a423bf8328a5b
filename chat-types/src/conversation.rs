//! Conversation metadata and the denormalized last-message cache.

use serde::{Deserialize, Serialize};

use crate::{ChatError, ConversationId, Message, Timestamp, UserId};

/// Whether a conversation is a 1:1 chat or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    /// Exactly two distinct participants; deterministic id.
    Direct,
    /// One or more participants; random id.
    Group,
}

impl ConversationKind {
    /// String form used in storage rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    /// Parse the storage-row string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// A conversation between participants.
///
/// `last_message_text` / `last_message_at` are a denormalized cache kept
/// eventually consistent with the message sub-collection by the dual write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier (deterministic for direct chats).
    pub id: ConversationId,
    /// Direct or group.
    pub kind: ConversationKind,
    /// Participants; non-empty, deduplicated. Sorted for direct chats.
    pub participant_ids: Vec<UserId>,
    /// Text of the most recent message, if any.
    pub last_message_text: Option<String>,
    /// Instant of the most recent message, if any.
    pub last_message_at: Option<Timestamp>,
    /// Creation instant.
    pub created_at: Timestamp,
}

impl Conversation {
    /// Create a direct conversation between two distinct users.
    ///
    /// The id is derived from the sorted pair, so calling this twice with
    /// the same users (in either order) yields the same conversation.
    pub fn direct(a: &UserId, b: &UserId, created_at: Timestamp) -> Result<Self, ChatError> {
        if a == b {
            return Err(ChatError::InvalidParticipants(
                "direct conversation requires two distinct users".into(),
            ));
        }
        let mut participants = vec![a.clone(), b.clone()];
        participants.sort();
        Ok(Self {
            id: ConversationId::direct(a, b),
            kind: ConversationKind::Direct,
            participant_ids: participants,
            last_message_text: None,
            last_message_at: None,
            created_at,
        })
    }

    /// Create a group conversation with a random id.
    ///
    /// Duplicate participants are removed; the first occurrence keeps its
    /// position.
    pub fn group(participants: &[UserId], created_at: Timestamp) -> Result<Self, ChatError> {
        let mut unique: Vec<UserId> = Vec::with_capacity(participants.len());
        for p in participants {
            if !unique.contains(p) {
                unique.push(p.clone());
            }
        }
        if unique.is_empty() {
            return Err(ChatError::InvalidParticipants(
                "group conversation requires at least one participant".into(),
            ));
        }
        Ok(Self {
            id: ConversationId::random(),
            kind: ConversationKind::Group,
            participant_ids: unique,
            last_message_text: None,
            last_message_at: None,
            created_at,
        })
    }

    /// Participants other than `user`.
    pub fn others(&self, user: &UserId) -> Vec<UserId> {
        self.participant_ids
            .iter()
            .filter(|p| *p != user)
            .cloned()
            .collect()
    }

    /// Whether this is a group conversation.
    pub fn is_group(&self) -> bool {
        matches!(self.kind, ConversationKind::Group)
    }

    /// Apply a last-message summary update.
    pub fn apply_summary(&mut self, summary: &SummaryUpdate) {
        self.last_message_text = Some(summary.last_message_text.clone());
        self.last_message_at = Some(summary.last_message_at);
    }
}

/// The conversation-summary half of the atomic dual write.
///
/// A message must never become visible without this update landing with it,
/// and vice versa; conversation-list ordering depends on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryUpdate {
    /// New `last_message_text` value.
    pub last_message_text: String,
    /// New `last_message_at` value.
    pub last_message_at: Timestamp,
}

impl SummaryUpdate {
    /// Build the summary update carried alongside `message`.
    pub fn for_message(message: &Message) -> Self {
        Self {
            last_message_text: message.text.clone(),
            last_message_at: message.created_at,
        }
    }
}
