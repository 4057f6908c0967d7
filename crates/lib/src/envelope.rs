//! Caller-facing result envelope for send-with-reply and email sends.

use crate::channels::{EmailReceipt, InboundMessage, SentMessage};
use crate::wait::WaitOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Sent,
    CompletedWithReply,
    SentButNoReply,
    SentButErrorWaiting,
    SendFailed,
    Error,
}

impl EnvelopeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeStatus::Sent => "sent",
            EnvelopeStatus::CompletedWithReply => "completed_with_reply",
            EnvelopeStatus::SentButNoReply => "sent_but_no_reply",
            EnvelopeStatus::SentButErrorWaiting => "sent_but_error_waiting",
            EnvelopeStatus::SendFailed => "send_failed",
            EnvelopeStatus::Error => "error",
        }
    }

    /// True when the message went out, whatever happened to the wait.
    pub fn is_delivered(self) -> bool {
        matches!(
            self,
            EnvelopeStatus::Sent
                | EnvelopeStatus::CompletedWithReply
                | EnvelopeStatus::SentButNoReply
                | EnvelopeStatus::SentButErrorWaiting
        )
    }
}

impl std::fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    pub target: String,
    pub date: DateTime<Utc>,
}

impl From<&SentMessage> for SentSummary {
    fn from(sent: &SentMessage) -> Self {
        Self {
            id: sent.id.clone(),
            text: sent.text.clone(),
            target: sent.target.clone(),
            date: sent.sent_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplySummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_name: Option<String>,
    pub date: DateTime<Utc>,
    pub is_direct_reply: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl ReplySummary {
    fn new(reply: &InboundMessage, is_direct_reply: bool) -> Self {
        Self {
            id: reply.message_id.clone(),
            text: reply.text.clone(),
            from: reply.sender.clone(),
            from_name: reply.sender_name.clone(),
            date: reply.timestamp,
            is_direct_reply,
            group: reply.group.clone(),
        }
    }
}

/// What happened while waiting, nested under `reply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyReport {
    ReplyReceived {
        message: ReplySummary,
        wait_time_seconds: f64,
    },
    Timeout {
        message: String,
        waited_seconds: f64,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub status: EnvelopeStatus,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_sent: Option<SentSummary>,
    #[serde(default)]
    pub expected_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waited_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultEnvelope {
    fn base(status: EnvelopeStatus, channel: &str, expected_reply: bool) -> Self {
        Self {
            status,
            channel: channel.to_string(),
            message_sent: None,
            expected_reply,
            reply: None,
            waited_seconds: None,
            error: None,
        }
    }

    /// Failure before anything was sent: unknown channel, missing target, not configured.
    pub fn error(channel: &str, reason: impl Into<String>) -> Self {
        let mut env = Self::base(EnvelopeStatus::Error, channel, false);
        env.error = Some(reason.into());
        env
    }

    /// Map a wait outcome to its envelope. Every outcome has exactly one status.
    pub fn build(channel: &str, expected_reply: bool, outcome: WaitOutcome) -> Self {
        match outcome {
            WaitOutcome::NotConfigured { reason } => {
                let mut env = Self::error(channel, reason);
                env.expected_reply = expected_reply;
                env
            }
            WaitOutcome::SendFailed { reason } => {
                let mut env = Self::base(EnvelopeStatus::SendFailed, channel, expected_reply);
                env.error = Some(reason);
                env
            }
            WaitOutcome::Sent(sent) => {
                let mut env = Self::base(EnvelopeStatus::Sent, channel, expected_reply);
                env.message_sent = Some(SentSummary::from(&sent));
                env
            }
            WaitOutcome::ReplyReceived {
                sent,
                reply,
                direct_reply,
                wait_duration,
            } => {
                let mut env =
                    Self::base(EnvelopeStatus::CompletedWithReply, channel, expected_reply);
                env.message_sent = Some(SentSummary::from(&sent));
                env.reply = Some(ReplyReport::ReplyReceived {
                    message: ReplySummary::new(&reply, direct_reply),
                    wait_time_seconds: wait_duration.as_secs_f64(),
                });
                env
            }
            WaitOutcome::TimedOut {
                sent,
                waited_seconds,
            } => {
                let mut env = Self::base(EnvelopeStatus::SentButNoReply, channel, expected_reply);
                env.message_sent = Some(SentSummary::from(&sent));
                env.reply = Some(ReplyReport::Timeout {
                    message: "No reply received within timeout period".to_string(),
                    waited_seconds,
                });
                env.waited_seconds = Some(waited_seconds);
                env
            }
            WaitOutcome::PollError { sent, reason } => {
                let mut env =
                    Self::base(EnvelopeStatus::SentButErrorWaiting, channel, expected_reply);
                env.message_sent = Some(SentSummary::from(&sent));
                env.reply = Some(ReplyReport::Error {
                    error: reason.clone(),
                });
                env.error = Some(reason);
                env
            }
        }
    }

    /// Envelope for a delivered email (always `sent`; email never waits).
    pub fn email_sent(receipt: &EmailReceipt, body: &str) -> Self {
        let mut env = Self::base(EnvelopeStatus::Sent, "email", false);
        env.message_sent = Some(SentSummary {
            id: Some(receipt.id.clone()),
            text: body.to_string(),
            target: receipt.to.clone(),
            date: Utc::now(),
        });
        env
    }

    /// Text of the matched reply, if any.
    pub fn reply_text(&self) -> Option<&str> {
        match &self.reply {
            Some(ReplyReport::ReplyReceived { message, .. }) => Some(&message.text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::Cursor;
    use std::time::Duration;

    fn sent() -> SentMessage {
        SentMessage {
            id: Some("7".to_string()),
            target: "42".to_string(),
            sent_at: Utc::now(),
            text: "ping?".to_string(),
        }
    }

    #[test]
    fn sent_without_wait() {
        let env = ResultEnvelope::build("telegram", false, WaitOutcome::Sent(sent()));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "sent");
        assert_eq!(json["message_sent"]["target"], "42");
        assert_eq!(json["expected_reply"], false);
        assert!(json.get("reply").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn reply_received_shape() {
        let mut reply = InboundMessage::new("42", "pong", Cursor(3));
        reply.sender_name = Some("alice".to_string());
        let env = ResultEnvelope::build(
            "telegram",
            true,
            WaitOutcome::ReplyReceived {
                sent: sent(),
                reply,
                direct_reply: true,
                wait_duration: Duration::from_secs(2),
            },
        );
        assert_eq!(env.reply_text(), Some("pong"));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "completed_with_reply");
        assert_eq!(json["reply"]["status"], "reply_received");
        assert_eq!(json["reply"]["message"]["text"], "pong");
        assert_eq!(json["reply"]["message"]["is_direct_reply"], true);
        assert_eq!(json["reply"]["wait_time_seconds"], 2.0);
    }

    #[test]
    fn timeout_reports_waited_seconds() {
        let env = ResultEnvelope::build(
            "signal",
            true,
            WaitOutcome::TimedOut {
                sent: sent(),
                waited_seconds: 3.0,
            },
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "sent_but_no_reply");
        assert_eq!(json["waited_seconds"], 3.0);
        assert_eq!(json["reply"]["status"], "timeout");
        assert!(env.reply_text().is_none());
    }

    #[test]
    fn every_outcome_maps_to_one_status() {
        let cases = [
            (
                WaitOutcome::NotConfigured {
                    reason: "no token".to_string(),
                },
                EnvelopeStatus::Error,
            ),
            (
                WaitOutcome::SendFailed {
                    reason: "boom".to_string(),
                },
                EnvelopeStatus::SendFailed,
            ),
            (WaitOutcome::Sent(sent()), EnvelopeStatus::Sent),
            (
                WaitOutcome::PollError {
                    sent: sent(),
                    reason: "bad".to_string(),
                },
                EnvelopeStatus::SentButErrorWaiting,
            ),
        ];
        for (outcome, status) in cases {
            let env = ResultEnvelope::build("x", true, outcome);
            assert_eq!(env.status, status);
            assert_eq!(env.status.is_delivered(), env.message_sent.is_some());
        }
    }

    #[test]
    fn not_configured_carries_reason() {
        let env = ResultEnvelope::build(
            "telegram",
            true,
            WaitOutcome::NotConfigured {
                reason: "Telegram not configured".to_string(),
            },
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "Telegram not configured");
        assert!(json.get("message_sent").is_none());
    }
}
