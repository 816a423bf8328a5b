//! Local permission rules for edit and delete.
//!
//! These checks run before any remote call; a rejection here has no side
//! effects anywhere.

use std::time::Duration;

use chat_types::{ChatError, Message, Timestamp, UserId};

/// How long after creation a message stays editable.
pub const EDIT_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Check whether `editor` may edit `message` at `now`.
///
/// Sender-only, within [`EDIT_WINDOW`] of `created_at`, and only while the
/// message is not deleted (for everyone, or locally by the editor).
pub fn check_edit(message: &Message, editor: &UserId, now: Timestamp) -> Result<(), ChatError> {
    if !message.is_from(editor) {
        return Err(ChatError::NotSender {
            action: "edit a message",
        });
    }
    if message.is_deleted_for(editor) {
        return Err(ChatError::MessageDeleted);
    }
    if now.saturating_since(message.created_at) > EDIT_WINDOW {
        return Err(ChatError::EditWindowElapsed);
    }
    Ok(())
}

/// Check whether `user` may delete `message` for everyone.
///
/// Sender-only; a message already tombstoned cannot be deleted again.
pub fn check_delete_for_everyone(message: &Message, user: &UserId) -> Result<(), ChatError> {
    if !message.is_from(user) {
        return Err(ChatError::NotSender {
            action: "delete for everyone",
        });
    }
    if message.deleted_for_everyone {
        return Err(ChatError::MessageDeleted);
    }
    Ok(())
}
