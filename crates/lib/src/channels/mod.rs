//! Communication channels (Telegram, Signal, email).
//!
//! Telegram and Signal implement [`Channel`]: a send primitive plus a bounded
//! receive-since-cursor primitive. The wait engine drives both through that trait and never
//! sees a transport. Email is send-only and lives beside them.

mod cursor;
mod email;
mod inbound;
#[cfg(test)]
pub(crate) mod mock;
mod signal;
mod telegram;

pub use cursor::{Cursor, CursorStore};
pub use email::{EmailChannel, EmailReceipt, EmailRequest};
pub use inbound::{InboundMessage, SentMessage};
pub use signal::{parse_receive_output, SignalChannel};
pub use telegram::{TelegramChannel, TelegramUpdate};

use async_trait::async_trait;

/// Failures surfaced by a channel adapter.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Required credentials or identity are absent. Never retried.
    #[error("{0}")]
    NotConfigured(String),
    /// The recipient is not valid for this channel. Never retried.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    /// HTTP client failure (connect, timeout, body decode).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The transport answered but reported failure (API error, non-zero exit, subprocess timeout).
    #[error("{0}")]
    Transport(String),
    #[error("{0} is not supported by this channel")]
    Unsupported(&'static str),
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

impl ChannelError {
    /// True for network/process level failures, the only kind the wait engine retries.
    pub fn is_transport(&self) -> bool {
        matches!(self, ChannelError::Request(_) | ChannelError::Transport(_))
    }
}

/// Result of one bounded poll.
#[derive(Debug, Clone, Default)]
pub struct PollBatch {
    /// New messages in arrival order.
    pub messages: Vec<InboundMessage>,
    /// Cursor that excludes everything in this batch (and anything skipped while reading it).
    pub next_cursor: Cursor,
}

/// Uniform capability set of a reply-capable channel.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel id (e.g. "telegram").
    fn id(&self) -> &str;

    /// Ok when credentials and identity are present; otherwise the reason as `NotConfigured`.
    fn check_configured(&self) -> Result<(), ChannelError>;

    /// Recipient used when the caller does not name one.
    fn default_target(&self) -> Option<String> {
        None
    }

    /// Human-readable capability list for status reporting.
    fn capabilities(&self) -> Vec<String>;

    /// Last-consumed position in this channel's inbound stream.
    fn cursor_store(&self) -> &CursorStore;

    /// Deliver `text` to `target`. One call, one external side effect.
    async fn send(&self, text: &str, target: &str) -> Result<SentMessage, ChannelError>;

    /// Messages after `cursor`. Bounded by a short per-call timeout; returns an empty batch
    /// rather than blocking when nothing arrived. Does not move the stored cursor.
    async fn poll_since(&self, cursor: Cursor) -> Result<PollBatch, ChannelError>;

    /// Hook run once after a successful send and before the first wait poll.
    async fn prepare_wait(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Live check against the transport (bot identity, CLI version). Sends nothing.
    async fn probe(&self) -> Result<String, ChannelError> {
        Err(ChannelError::Unsupported("probe"))
    }
}

/// Truncate message text for log lines.
pub(crate) fn preview(text: &str) -> String {
    const MAX: usize = 50;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{}...", cut)
    }
}
