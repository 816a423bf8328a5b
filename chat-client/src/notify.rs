//! Notification boundary.
//!
//! The core decides *when* to notify (inbound message, not authored
//! locally, conversation not in focus); the supplied [`Notifier`] decides
//! what to do with it. Formatting, name resolution, and display are out of
//! scope here.

use std::sync::{Arc, Mutex};

use chat_types::{ConversationId, UserId};

/// A new inbound message worth notifying about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessageNotice {
    /// The conversation the message arrived in.
    pub conversation_id: ConversationId,
    /// The author.
    pub sender_id: UserId,
    /// The message text.
    pub text: String,
    /// Whether the conversation is a group.
    pub is_group: bool,
}

/// Trait for notification sinks.
pub trait Notifier: Send + Sync {
    /// Handle a new inbound message.
    fn notify(&self, notice: NewMessageNotice);
}

/// A notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _notice: NewMessageNotice) {}
}

/// A notifier that records every notice (for testing).
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<NewMessageNotice>>>,
}

impl RecordingNotifier {
    /// Create a new recording notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices received so far.
    pub fn notices(&self) -> Vec<NewMessageNotice> {
        self.notices.lock().unwrap().clone()
    }
}

impl Clone for RecordingNotifier {
    fn clone(&self) -> Self {
        Self {
            notices: Arc::clone(&self.notices),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: NewMessageNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}
