//! Dispatcher: one wait engine per reply-capable channel, plus the email sender.
//!
//! Built once at startup and shared (CLI command, gateway state). Channels are owned
//! instances, each with its own cursor; nothing is looked up from globals.

use crate::channels::{
    Channel, ChannelError, EmailChannel, EmailRequest, InboundMessage, SignalChannel,
    TelegramChannel,
};
use crate::config::Config;
use crate::envelope::{EnvelopeStatus, ResultEnvelope};
use crate::wait::{WaitEngine, WaitRequest};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const EMAIL: &str = "email";
const SUBJECT_MAX: usize = 78;

/// Read-only status of one channel.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub service: String,
    pub configured: bool,
    /// Why the channel is not configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_target: Option<String>,
    pub capabilities: Vec<String>,
    pub active_waits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<i64>,
}

#[derive(Default)]
pub struct Dispatcher {
    engines: BTreeMap<String, WaitEngine>,
    email: Option<EmailChannel>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Telegram, Signal and email, built from config + env.
    pub fn from_config(config: &Config) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(Arc::new(TelegramChannel::from_config(config)));
        dispatcher.register(Arc::new(SignalChannel::from_config(config)));
        dispatcher.with_email(EmailChannel::from_config(config))
    }

    /// Add a reply-capable channel. Replaces any channel with the same id.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let id = channel.id().to_string();
        if self
            .engines
            .insert(id.clone(), WaitEngine::new(channel))
            .is_some()
        {
            log::debug!("dispatcher: replaced channel {}", id);
        }
    }

    pub fn with_email(mut self, email: EmailChannel) -> Self {
        self.email = Some(email);
        self
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.engines.keys().cloned().collect();
        if self.email.is_some() {
            ids.push(EMAIL.to_string());
        }
        ids
    }

    /// The single send entry point. Never fails: every problem becomes an envelope.
    pub async fn send_with_reply(
        &self,
        channel_id: &str,
        message: &str,
        target: Option<&str>,
        wait_for_reply: bool,
        timeout_seconds: f64,
    ) -> ResultEnvelope {
        if channel_id == EMAIL && self.email.is_some() {
            if wait_for_reply {
                return ResultEnvelope::error(
                    EMAIL,
                    "email does not support waiting for replies",
                );
            }
            return self
                .send_email(target, &subject_from(message), message, None)
                .await;
        }
        let Some(engine) = self.engines.get(channel_id) else {
            return ResultEnvelope::error(
                channel_id,
                ChannelError::UnknownChannel(channel_id.to_string()).to_string(),
            );
        };
        let channel = engine.channel();
        // Configuration is reported ahead of a missing target.
        if let Err(e) = channel.check_configured() {
            return ResultEnvelope::error(channel_id, e.to_string());
        }
        let target = match target
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .or_else(|| channel.default_target())
        {
            Some(t) => t,
            None => {
                return ResultEnvelope::error(
                    channel_id,
                    format!("no {} target given and no default configured", channel_id),
                )
            }
        };
        let req = WaitRequest {
            message: message.to_string(),
            target,
            wait_for_reply,
            timeout_seconds,
        };
        let outcome = engine.run(&req).await;
        ResultEnvelope::build(channel_id, wait_for_reply, outcome)
    }

    /// Poll once from the stored cursor and consume everything returned.
    pub async fn receive(&self, channel_id: &str) -> Result<Vec<InboundMessage>, ChannelError> {
        if channel_id == EMAIL {
            return Err(ChannelError::Unsupported("receive"));
        }
        let engine = self
            .engines
            .get(channel_id)
            .ok_or_else(|| ChannelError::UnknownChannel(channel_id.to_string()))?;
        let channel = engine.channel();
        channel.check_configured()?;
        let store = channel.cursor_store();
        let batch = channel.poll_since(store.current()).await?;
        store.advance(batch.next_cursor);
        Ok(batch.messages)
    }

    /// Send one email. `to` falls back to the configured default recipient.
    pub async fn send_email(
        &self,
        to: Option<&str>,
        subject: &str,
        body: &str,
        html_body: Option<&str>,
    ) -> ResultEnvelope {
        let Some(email) = &self.email else {
            return ResultEnvelope::error(
                EMAIL,
                ChannelError::UnknownChannel(EMAIL.to_string()).to_string(),
            );
        };
        let Some(to) = to
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .or_else(|| email.default_to())
        else {
            return ResultEnvelope::error(
                EMAIL,
                "no email recipient given and no default configured",
            );
        };
        let req = EmailRequest {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            html_body: html_body.map(String::from),
        };
        match email.send_email(&req).await {
            Ok(receipt) => ResultEnvelope::email_sent(&receipt, body),
            Err(e @ ChannelError::NotConfigured(_)) => ResultEnvelope::error(EMAIL, e.to_string()),
            Err(e) => {
                let mut env = ResultEnvelope::error(EMAIL, e.to_string());
                env.status = EnvelopeStatus::SendFailed;
                env
            }
        }
    }

    pub fn status(&self, id: &str) -> Option<ChannelStatus> {
        if id == EMAIL {
            let email = self.email.as_ref()?;
            return Some(ChannelStatus {
                service: EMAIL.to_string(),
                configured: email.is_configured(),
                detail: (!email.is_configured())
                    .then(|| "Set RESEND_API_KEY and FROM_EMAIL".to_string()),
                default_target: email.default_to().map(String::from),
                capabilities: email.capabilities(),
                active_waits: 0,
                cursor: None,
            });
        }
        let engine = self.engines.get(id)?;
        let channel = engine.channel();
        let configured = channel.check_configured();
        Some(ChannelStatus {
            service: id.to_string(),
            configured: configured.is_ok(),
            detail: configured.err().map(|e| e.to_string()),
            default_target: channel.default_target(),
            capabilities: channel.capabilities(),
            active_waits: engine.active_waits(),
            cursor: Some(channel.cursor_store().current().value()),
        })
    }

    pub fn status_all(&self) -> Vec<ChannelStatus> {
        self.channel_ids()
            .iter()
            .filter_map(|id| self.status(id))
            .collect()
    }

    /// Live transport check for one channel. Configured channels only.
    pub async fn probe(&self, id: &str) -> Result<String, ChannelError> {
        let engine = self
            .engines
            .get(id)
            .ok_or_else(|| ChannelError::UnknownChannel(id.to_string()))?;
        engine.channel().check_configured()?;
        engine.channel().probe().await
    }
}

/// First line of the message, cut to a reasonable subject length.
fn subject_from(message: &str) -> String {
    let first = message.lines().next().unwrap_or("").trim();
    if first.is_empty() {
        return "Notification".to_string();
    }
    if first.chars().count() <= SUBJECT_MAX {
        first.to_string()
    } else {
        let cut: String = first.chars().take(SUBJECT_MAX - 3).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::mock::ScriptedChannel;

    fn dispatcher(channel: ScriptedChannel) -> (Dispatcher, Arc<ScriptedChannel>) {
        let channel = Arc::new(channel);
        let mut d = Dispatcher::new();
        d.register(channel.clone());
        (d, channel)
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_is_sent() {
        let (d, channel) = dispatcher(ScriptedChannel::new("signal"));
        let env = d
            .send_with_reply("signal", "hello", Some("+15551230000"), false, 180.0)
            .await;
        assert_eq!(env.status, EnvelopeStatus::Sent);
        assert_eq!(env.message_sent.unwrap().target, "+15551230000");
        assert_eq!(channel.polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfigured_is_error_without_transport() {
        let (d, channel) = dispatcher(ScriptedChannel::new("telegram").unconfigured());
        let env = d
            .send_with_reply("telegram", "hi", Some("42"), true, 5.0)
            .await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert_eq!(env.error.as_deref(), Some("telegram not configured"));
        assert_eq!(channel.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn default_target_is_used() {
        let (d, _channel) = dispatcher(
            ScriptedChannel::new("telegram")
                .with_default_target("42")
                .then_messages(&[("42", "pong")]),
        );
        let env = d.send_with_reply("telegram", "ping?", None, true, 5.0).await;
        assert_eq!(env.status, EnvelopeStatus::CompletedWithReply);
        assert_eq!(env.reply_text(), Some("pong"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_target_is_error() {
        let (d, channel) = dispatcher(ScriptedChannel::new("telegram"));
        let env = d.send_with_reply("telegram", "hi", Some("  "), false, 5.0).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert_eq!(channel.sends(), 0);
    }

    #[tokio::test]
    async fn unknown_channel_is_error() {
        let d = Dispatcher::new();
        let env = d.send_with_reply("fax", "hi", Some("1"), false, 5.0).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        assert_eq!(env.error.as_deref(), Some("unknown channel: fax"));
        assert!(matches!(
            d.receive("fax").await,
            Err(ChannelError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn receive_consumes_the_batch() {
        let (d, channel) = dispatcher(
            ScriptedChannel::new("signal").then_messages(&[("+1555", "a"), ("+1666", "b")]),
        );
        let msgs = d.receive("signal").await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(channel.cursor_store().current().value(), 2);
        assert!(d.receive("signal").await.unwrap().is_empty());
        assert_eq!(channel.cursor_store().current().value(), 2);
    }

    #[tokio::test]
    async fn email_cannot_wait() {
        let d = Dispatcher::new().with_email(EmailChannel::new(None, None, None));
        let env = d
            .send_with_reply("email", "hi", Some("a@b.c"), true, 5.0)
            .await;
        assert_eq!(env.status, EnvelopeStatus::Error);
        let env = d.send_email(Some("a@b.c"), "s", "b", None).await;
        assert_eq!(env.status, EnvelopeStatus::Error);
    }

    #[test]
    fn status_reports_every_channel() {
        let (d, _channel) =
            dispatcher(ScriptedChannel::new("telegram").with_default_target("42"));
        let d = d.with_email(EmailChannel::new(None, None, Some("ops@example.com".into())));
        let all = d.status_all();
        assert_eq!(all.len(), 2);
        let tg = &all[0];
        assert_eq!(tg.service, "telegram");
        assert!(tg.configured);
        assert_eq!(tg.default_target.as_deref(), Some("42"));
        assert_eq!(tg.cursor, Some(0));
        let email = &all[1];
        assert!(!email.configured);
        assert_eq!(email.default_target.as_deref(), Some("ops@example.com"));
        assert!(d.status("fax").is_none());
    }

    #[test]
    fn subject_is_first_line() {
        assert_eq!(subject_from("BTC alert\nprice is up"), "BTC alert");
        assert_eq!(subject_from(""), "Notification");
        assert_eq!(subject_from(&"x".repeat(100)).chars().count(), SUBJECT_MAX);
    }
}
