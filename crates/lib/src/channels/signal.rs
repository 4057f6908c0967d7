//! Signal channel: drives a local `signal-cli` install.
//!
//! No shell is used; arguments are passed as a list. Every invocation is bounded by a
//! timeout and the child is killed if the bound expires.

use crate::channels::{
    preview, Channel, ChannelError, Cursor, CursorStore, InboundMessage, PollBatch, SentMessage,
};
use crate::config::{self, Config};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::process::Command;

const SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// Seconds signal-cli listens per receive call.
const RECEIVE_LISTEN_SECS: u64 = 1;
/// Extra time granted to signal-cli beyond its own listen window (JVM startup, sync).
const RECEIVE_GRACE: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

struct CliOutput {
    stdout: String,
    stderr: String,
    code: Option<i32>,
}

impl CliOutput {
    fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// signal-cli exits non-zero when a receive window closes empty; that is not a failure.
    fn is_empty_receive(&self) -> bool {
        self.stderr.to_lowercase().contains("timeout") || self.code == Some(1)
    }

    fn failure(&self) -> ChannelError {
        let detail = self.stderr.trim();
        ChannelError::Transport(format!(
            "signal-cli failed: {}",
            if detail.is_empty() { "unknown error" } else { detail }
        ))
    }
}

/// signal-cli adapter. The CLI has no cursor API; the stored cursor counts envelopes consumed.
pub struct SignalChannel {
    id: String,
    account: Option<String>,
    cli_path: String,
    cursor: CursorStore,
}

impl SignalChannel {
    pub fn new(account: Option<String>, cli_path: impl Into<String>) -> Self {
        Self {
            id: "signal".to_string(),
            account: account.map(|a| normalize_phone_number(&a)),
            cli_path: cli_path.into(),
            cursor: CursorStore::new(),
        }
    }

    /// Build from config + env (SIGNAL_PHONE_NUMBER, SIGNAL_CLI_PATH).
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_signal_phone_number(config),
            config::resolve_signal_cli_path(config),
        )
    }

    fn account(&self) -> Result<&str, ChannelError> {
        match self.account.as_deref() {
            Some(a) if config::is_valid_phone_number(a) => Ok(a),
            Some(a) => Err(ChannelError::NotConfigured(format!(
                "Signal account {:?} is not a phone number starting with +",
                a
            ))),
            None => Err(ChannelError::NotConfigured(
                "Signal not configured. Set SIGNAL_PHONE_NUMBER (or channels.signal.phoneNumber)"
                    .to_string(),
            )),
        }
    }

    /// Run signal-cli with `args`, killing it if `bound` elapses.
    async fn run_cli(&self, args: &[&str], bound: Duration) -> Result<CliOutput, ChannelError> {
        let child = Command::new(&self.cli_path)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = match tokio::time::timeout(bound, child).await {
            Ok(res) => res.map_err(|e| ChannelError::Transport(format!("exec failed: {}", e)))?,
            Err(_) => {
                log::error!("signal-cli timed out after {}s", bound.as_secs());
                return Err(ChannelError::Transport(format!(
                    "signal-cli timed out after {}s",
                    bound.as_secs()
                )));
            }
        };
        Ok(CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

#[async_trait]
impl Channel for SignalChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn check_configured(&self) -> Result<(), ChannelError> {
        self.account().map(|_| ())
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "Send messages to any phone number".to_string(),
            "Wait for replies with 1-second polling".to_string(),
            "Configurable timeout (default 3 minutes)".to_string(),
            "Account from SIGNAL_PHONE_NUMBER".to_string(),
        ]
    }

    fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    async fn send(&self, text: &str, target: &str) -> Result<SentMessage, ChannelError> {
        let account = self.account()?;
        if text.trim().is_empty() {
            return Err(ChannelError::InvalidMessage("message text is empty".to_string()));
        }
        if !config::is_valid_phone_number(target.trim()) {
            return Err(ChannelError::InvalidTarget(
                "recipient must be a phone number starting with +".to_string(),
            ));
        }
        // signal-cli reports senders without separators; the stored target must compare equal.
        let recipient = normalize_phone_number(target);
        log::info!("signal: sending to {}: {}", recipient, preview(text));
        let out = self
            .run_cli(&["-u", account, "send", "-m", text, recipient.as_str()], SEND_TIMEOUT)
            .await?;
        if !out.success() {
            let err = out.failure();
            log::error!("signal: {}", err);
            return Err(err);
        }
        Ok(SentMessage {
            id: None,
            target: recipient,
            sent_at: Utc::now(),
            text: text.to_string(),
        })
    }

    async fn poll_since(&self, cursor: Cursor) -> Result<PollBatch, ChannelError> {
        let account = self.account()?;
        let listen = RECEIVE_LISTEN_SECS.to_string();
        let out = self
            .run_cli(
                &["-u", account, "-o", "json", "receive", "--timeout", listen.as_str()],
                Duration::from_secs(RECEIVE_LISTEN_SECS) + RECEIVE_GRACE,
            )
            .await?;
        if !out.success() {
            if out.is_empty_receive() {
                log::debug!("signal: no messages within the receive window");
                return Ok(PollBatch {
                    messages: Vec::new(),
                    next_cursor: cursor,
                });
            }
            return Err(out.failure());
        }
        let mut messages = parse_receive_output(&out.stdout);
        for (i, msg) in messages.iter_mut().enumerate() {
            msg.position = Cursor(cursor.value() + i as i64 + 1);
        }
        let next_cursor = Cursor(cursor.value() + messages.len() as i64);
        if !messages.is_empty() {
            log::info!("signal: received {} message(s)", messages.len());
        }
        Ok(PollBatch {
            messages,
            next_cursor,
        })
    }

    /// `signal-cli --version`.
    async fn probe(&self) -> Result<String, ChannelError> {
        let out = self.run_cli(&["--version"], PROBE_TIMEOUT).await?;
        if out.success() {
            Ok(out.stdout.trim().to_string())
        } else {
            Err(out.failure())
        }
    }
}

/// `+1 555-123-0000` -> `+15551230000`.
pub fn normalize_phone_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

fn timestamp_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Parse `signal-cli receive` output into inbound messages (positions left at zero).
/// JSON lines (`-o json`) are preferred; plain-text output ("Envelope from:" / "Body:") is a fallback.
pub fn parse_receive_output(output: &str) -> Vec<InboundMessage> {
    let mut messages = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                if let Some(msg) = envelope_to_inbound(&value) {
                    messages.push(msg);
                }
            }
            Err(_) if line.contains("Envelope from:") => {
                return parse_plain_output(output);
            }
            Err(_) => {}
        }
    }
    messages
}

fn envelope_to_inbound(value: &serde_json::Value) -> Option<InboundMessage> {
    let envelope = value.get("envelope")?;
    let data = envelope.get("dataMessage");
    // `source` may be a UUID on newer signal-cli; prefer the number.
    let sender = envelope
        .get("sourceNumber")
        .and_then(|v| v.as_str())
        .or_else(|| envelope.get("source").and_then(|v| v.as_str()))?
        .to_string();
    let text = data
        .and_then(|d| d.get("message"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let timestamp = data
        .and_then(|d| d.get("timestamp"))
        .or_else(|| envelope.get("timestamp"))
        .and_then(|v| v.as_i64())
        .map(timestamp_from_millis)
        .unwrap_or_else(Utc::now);
    let thread_ref = data
        .and_then(|d| d.get("quote"))
        .and_then(|q| q.get("id"))
        .and_then(|v| v.as_i64())
        .map(|id| id.to_string());
    let group = data
        .and_then(|d| d.get("groupInfo"))
        .and_then(|g| g.get("groupId"))
        .and_then(|v| v.as_str())
        .map(String::from);
    let sender_name = envelope
        .get("sourceName")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);
    Some(InboundMessage {
        sender,
        text,
        timestamp,
        thread_ref,
        position: Cursor::default(),
        message_id: data
            .and_then(|d| d.get("timestamp"))
            .and_then(|v| v.as_i64())
            .map(|t| t.to_string()),
        sender_name,
        group,
    })
}

/// Plain-text receive output: one envelope described over several lines.
fn parse_plain_output(output: &str) -> Vec<InboundMessage> {
    let mut sender = None;
    let mut body = None;
    let mut timestamp = None;
    for line in output.lines() {
        if let Some((_, rest)) = line.split_once("Envelope from:") {
            // e.g. `“Alice” +15551230000 (device: 1)`
            let rest = rest.trim();
            let number = rest
                .split_whitespace()
                .find(|w| w.starts_with('+'))
                .map(String::from);
            sender = number.or_else(|| Some(rest.to_string()));
        } else if let Some((_, rest)) = line.split_once("Body:") {
            body = Some(rest.trim().to_string());
        } else if let Some((_, rest)) = line.split_once("Timestamp:") {
            timestamp = rest
                .split_whitespace()
                .next()
                .and_then(|t| t.parse::<i64>().ok());
        }
    }
    if sender.is_none() && body.is_none() {
        return Vec::new();
    }
    let mut msg = InboundMessage::new(
        sender.unwrap_or_default(),
        body.unwrap_or_default(),
        Cursor::default(),
    );
    if let Some(ms) = timestamp {
        msg.timestamp = timestamp_from_millis(ms);
    }
    vec![msg]
}
