//! Error taxonomy for chatsync.

use thiserror::Error;

use crate::MessageId;

/// Errors surfaced by the synchronization core.
///
/// Three classes with different handling:
/// - validation and permission errors are rejected locally, before any
///   state mutation or remote call, and are never retried;
/// - remote-write errors are retried with backoff and surfaced after
///   exhaustion, with the affected message parked at `Error` status;
/// - storage errors are reported upward without dropping the in-memory
///   optimistic state.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Message text is empty after trimming.
    #[error("message text is empty")]
    EmptyMessage,

    /// Message text exceeds the configured cap.
    #[error("message too long: {len} chars (limit: {limit})")]
    MessageTooLong {
        /// Actual length after trimming.
        len: usize,
        /// Maximum allowed length.
        limit: usize,
    },

    /// The send gate rejected the operation.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Why the send was rejected.
        reason: String,
    },

    /// The message id is absent from the Local Store.
    #[error("message not found: {0}")]
    NotFound(MessageId),

    /// The operation is restricted to the message sender.
    #[error("only the sender can {action}")]
    NotSender {
        /// The attempted operation.
        action: &'static str,
    },

    /// The edit window has elapsed.
    #[error("edit window elapsed")]
    EditWindowElapsed,

    /// The message is tombstoned and can no longer be mutated.
    #[error("message was deleted")]
    MessageDeleted,

    /// The remote write failed after retries were exhausted.
    #[error("remote write failed: {0}")]
    RemoteWrite(String),

    /// The Local Store failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid participant set for a conversation.
    #[error("invalid participants: {0}")]
    InvalidParticipants(String),
}

impl ChatError {
    /// Whether this is a validation failure (rejected before any side
    /// effect).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage | Self::MessageTooLong { .. } | Self::InvalidParticipants(_)
        )
    }

    /// Whether this is a permission failure (rejected locally, no remote
    /// call made).
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            Self::NotSender { .. } | Self::EditWindowElapsed | Self::MessageDeleted
        )
    }

    /// Whether the failed operation can be retried by the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::RemoteWrite(_) | Self::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ChatError::MessageTooLong {
            len: 5000,
            limit: 4096,
        };
        assert_eq!(err.to_string(), "message too long: 5000 chars (limit: 4096)");
    }

    #[test]
    fn validation_classifier() {
        assert!(ChatError::EmptyMessage.is_validation());
        assert!(!ChatError::EmptyMessage.is_permission());
        assert!(!ChatError::EmptyMessage.is_retriable());
    }

    #[test]
    fn permission_classifier() {
        assert!(ChatError::EditWindowElapsed.is_permission());
        assert!(ChatError::NotSender { action: "edit" }.is_permission());
        assert!(ChatError::MessageDeleted.is_permission());
        assert!(!ChatError::EditWindowElapsed.is_retriable());
    }

    #[test]
    fn retriable_classifier() {
        assert!(ChatError::RemoteWrite("timeout".into()).is_retriable());
        assert!(ChatError::Storage("disk full".into()).is_retriable());
        assert!(!ChatError::RateLimited {
            reason: "too fast".into()
        }
        .is_retriable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ChatError>();
    }
}
