//! # chat-types
//!
//! Domain types for the chatsync local-first message synchronization core.
//!
//! This crate provides the foundational types used across all chatsync
//! crates:
//! - [`MessageId`], [`UserId`], [`ConversationId`], [`Timestamp`] - Identity
//!   and ordering types
//! - [`Message`], [`DeliveryStatus`] - The message record and its delivery
//!   lifecycle
//! - [`Conversation`], [`SummaryUpdate`] - Conversation metadata and the
//!   denormalized last-message cache
//! - [`ChatError`] - Error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod conversation;
mod error;
mod ids;
mod message;

pub use conversation::{Conversation, ConversationKind, SummaryUpdate};
pub use error::ChatError;
pub use ids::{ConversationId, MessageId, Timestamp, UserId};
pub use message::{AckKind, DeliveryStatus, Message, DELETED_TEXT};
