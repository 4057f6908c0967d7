//! Outbound handle and inbound message shapes shared by every channel.

use chrono::{DateTime, Utc};

use crate::channels::Cursor;

/// A delivered message. Immutable; owned by one send-with-reply call.
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    /// Channel message id (Telegram message_id). None when the transport gives none (Signal).
    pub id: Option<String>,
    /// Identity replies are expected from (Telegram: resolved numeric chat id).
    pub target: String,
    pub sent_at: DateTime<Utc>,
    pub text: String,
}

/// A message read from a channel during one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Telegram chat id or Signal phone number.
    pub sender: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Id of the message this one replies to or quotes, when the transport reports it.
    pub thread_ref: Option<String>,
    /// Cursor that excludes this message and everything before it.
    pub position: Cursor,
    pub message_id: Option<String>,
    /// Display name (username or profile name) when known.
    pub sender_name: Option<String>,
    /// Group the message was posted in, if any.
    pub group: Option<String>,
}

impl InboundMessage {
    /// A plain text message with no threading or display metadata.
    pub fn new(sender: impl Into<String>, text: impl Into<String>, position: Cursor) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp: Utc::now(),
            thread_ref: None,
            position,
            message_id: None,
            sender_name: None,
            group: None,
        }
    }
}
