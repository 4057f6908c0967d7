//! Reply correlation: does a polled message count as the answer to a sent one?
//!
//! Matching is permissive. Any non-empty message from the target identity is the reply;
//! threading is reported but not required. In a group chat or a multi-turn exchange this
//! can pick up a message that was not meant as an answer.

use crate::channels::{InboundMessage, SentMessage};

/// True when `candidate` comes from `target` and carries text.
pub fn is_reply(candidate: &InboundMessage, _sent: &SentMessage, target: &str) -> bool {
    candidate.sender == target && !candidate.text.trim().is_empty()
}

/// True when `candidate` explicitly replies to (or quotes) `sent`.
pub fn is_direct_reply(candidate: &InboundMessage, sent: &SentMessage) -> bool {
    match (candidate.thread_ref.as_deref(), sent.id.as_deref()) {
        (Some(thread), Some(id)) => thread == id,
        _ => false,
    }
}
