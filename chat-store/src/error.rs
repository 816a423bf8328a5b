//! Error types for chat-store.

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Message not found.
    #[error("message not found: {id}")]
    NotFound {
        /// The message id that was not found.
        id: String,
    },

    /// A stored row could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Result type alias for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
