//! Delivery-status computation and receipt planning.
//!
//! Display status is computed on demand from the raw acknowledgement sets;
//! it is never persisted as a separate field. Receipt marking is planned
//! here as a pure id selection and executed by `chat-client` as a single
//! batched remote operation.

use chat_types::{AckKind, DeliveryStatus, Message, MessageId, UserId};

/// Compute the status to display for a message.
///
/// `others` are the conversation participants excluding the message
/// sender. `Sending` and `Error` pass through; otherwise the message is
/// `Read` once every other participant has read it, `Delivered` once every
/// other participant has received it, else `Sent`. With zero other
/// participants (degenerate self-chat) the answer is always `Sent`.
pub fn display_status(message: &Message, others: &[UserId]) -> DeliveryStatus {
    if message.status.is_pending() {
        return message.status;
    }
    if others.is_empty() {
        return DeliveryStatus::Sent;
    }
    if others.iter().all(|u| message.read_by.contains(u)) {
        DeliveryStatus::Read
    } else if others.iter().all(|u| message.delivered_to.contains(u)) {
        DeliveryStatus::Delivered
    } else {
        DeliveryStatus::Sent
    }
}

/// Select the messages `user` still needs to mark for `kind`.
///
/// Skips messages authored by `user` and messages already containing
/// `user` in the relevant set, so redundant writes never happen. Read
/// marks qualify on the read set alone; applying a read ack also fills
/// the delivered set (read implies delivered).
pub fn plan_acks(messages: &[Message], user: &UserId, kind: AckKind) -> Vec<MessageId> {
    messages
        .iter()
        .filter(|m| !m.is_from(user))
        .filter(|m| match kind {
            AckKind::Delivered => !m.delivered_to.contains(user),
            AckKind::Read => !m.read_by.contains(user),
        })
        .map(|m| m.id)
        .collect()
}
