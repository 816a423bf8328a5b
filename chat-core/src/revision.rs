//! Snapshot-and-restore for optimistic mutations.
//!
//! Edit and delete mutate existing shared state, so unlike send the prior
//! state is well-defined and worth restoring. A [`Revision`] captures both
//! sides of the mutation: the client applies `updated()` optimistically,
//! performs the remote call, and on failure restores `undo()` atomically.

use chat_types::{Message, MessageId, Timestamp, UserId};

/// One optimistic mutation of an existing message.
#[derive(Debug, Clone)]
pub struct Revision {
    prior: Message,
    updated: Message,
}

impl Revision {
    /// Capture a mutation of `prior` into `updated`.
    pub fn new(prior: Message, updated: Message) -> Self {
        debug_assert_eq!(prior.id, updated.id, "revision must not change the id");
        Self { prior, updated }
    }

    /// The id of the mutated message.
    pub fn id(&self) -> MessageId {
        self.prior.id
    }

    /// The message value to apply optimistically.
    pub fn updated(&self) -> &Message {
        &self.updated
    }

    /// The pre-mutation message, for rollback after a remote failure.
    pub fn undo(self) -> Message {
        self.prior
    }
}

/// Build the revision for an edit.
///
/// Appends the current text to the edit history and stamps `edited_at`.
/// Permission checks live in [`crate::policy`]; this only encodes the
/// mutation itself.
pub fn edit_revision(current: &Message, new_text: &str, edited_at: Timestamp) -> Revision {
    let mut updated = current.clone();
    updated.edit_history.push(current.text.clone());
    updated.text = new_text.to_string();
    updated.edited_at = Some(edited_at);
    Revision::new(current.clone(), updated)
}

/// Build the revision for a "delete for me".
pub fn delete_for_revision(current: &Message, user: &UserId) -> Revision {
    let mut updated = current.clone();
    updated.deleted_by.insert(user.clone());
    Revision::new(current.clone(), updated)
}

/// Build the revision for a "delete for everyone" tombstone.
pub fn tombstone_revision(current: &Message) -> Revision {
    let mut updated = current.clone();
    updated.tombstone();
    Revision::new(current.clone(), updated)
}
