//! Telegram channel: sendMessage and short-timeout getUpdates via the Bot API.

use crate::channels::{
    preview, Channel, ChannelError, Cursor, CursorStore, InboundMessage, PollBatch, SentMessage,
};
use crate::config::{self, Config};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
/// Server-side long-poll seconds per getUpdates call; kept short so the wait loop keeps its cadence.
const POLL_LONG_TIMEOUT: u64 = 1;
const POLL_HTTP_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_LIMIT: u32 = 100;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram update payload (getUpdates result item).
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    #[serde(default)]
    pub date: i64,
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramReplyRef>>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramReplyRef {
    pub message_id: i64,
}

impl TelegramUpdate {
    /// Convert to the channel-neutral shape. Updates without a message yield None.
    fn into_inbound(self) -> Option<InboundMessage> {
        let msg = self.message?;
        let sender_name = msg
            .from
            .as_ref()
            .and_then(|u| u.username.clone().or_else(|| u.first_name.clone()));
        Some(InboundMessage {
            sender: msg.chat.id.to_string(),
            text: msg.text.unwrap_or_default(),
            timestamp: timestamp_from_unix(msg.date),
            thread_ref: msg.reply_to_message.map(|r| r.message_id.to_string()),
            position: Cursor(self.update_id + 1),
            message_id: Some(msg.message_id.to_string()),
            sender_name,
            group: msg.chat.title,
        })
    }
}

fn timestamp_from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

/// True for a numeric chat id (groups are negative) or an `@username`.
pub fn is_valid_chat_target(target: &str) -> bool {
    let t = target.trim();
    if let Some(name) = t.strip_prefix('@') {
        return !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    }
    let digits = t.strip_prefix('-').unwrap_or(t);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Telegram Bot API adapter. Owns its update-id cursor.
pub struct TelegramChannel {
    id: String,
    token: Option<String>,
    default_chat: Option<String>,
    api_base: String,
    client: reqwest::Client,
    cursor: CursorStore,
}

impl TelegramChannel {
    pub fn new(token: Option<String>, default_chat: Option<String>) -> Self {
        Self {
            id: "telegram".to_string(),
            token,
            default_chat,
            api_base: telegram_api_base(),
            client: reqwest::Client::new(),
            cursor: CursorStore::new(),
        }
    }

    /// Build from config + env (TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID).
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_telegram_token(config),
            config::resolve_telegram_chat_id(config),
        )
    }

    /// Point the adapter at another Bot API server (tests, self-hosted API).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> Result<String, ChannelError> {
        let token = self.token.as_ref().ok_or_else(not_configured)?;
        Ok(format!("{}/bot{}/{}", self.api_base, token, method))
    }

    /// Read a Bot API response: HTTP errors and `ok: false` both become Transport errors.
    async fn read_result<T: serde::de::DeserializeOwned>(
        res: reqwest::Response,
        method: &str,
    ) -> Result<T, ChannelError> {
        let status = res.status();
        let body = res.text().await?;
        let data: ApiResponse<T> = serde_json::from_str(&body).map_err(|_| {
            ChannelError::Transport(format!("{} failed: {} {}", method, status, body))
        })?;
        if !data.ok {
            let reason = data
                .description
                .unwrap_or_else(|| format!("{} returned ok: false", method));
            return Err(ChannelError::Transport(format!("{} failed: {}", method, reason)));
        }
        data.result
            .ok_or_else(|| ChannelError::Transport(format!("{} returned no result", method)))
    }

    /// Call getUpdates with a short server-side timeout. Returns the raw updates.
    async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>, ChannelError> {
        let url = self.method_url("getUpdates")?;
        let res = self
            .client
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("limit", POLL_LIMIT.to_string()),
                ("timeout", POLL_LONG_TIMEOUT.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(POLL_HTTP_TIMEOUT)
            .send()
            .await?;
        Self::read_result(res, "getUpdates").await
    }
}

fn not_configured() -> ChannelError {
    ChannelError::NotConfigured(
        "Telegram not configured. Set TELEGRAM_BOT_TOKEN (or channels.telegram.botToken)"
            .to_string(),
    )
}

#[async_trait]
impl Channel for TelegramChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn check_configured(&self) -> Result<(), ChannelError> {
        match self.token {
            Some(ref t) if !t.trim().is_empty() => Ok(()),
            _ => Err(not_configured()),
        }
    }

    fn default_target(&self) -> Option<String> {
        self.default_chat.clone()
    }

    fn capabilities(&self) -> Vec<String> {
        vec![
            "Send messages to a chat id or @username".to_string(),
            "Wait for replies with 1-second polling".to_string(),
            "Configurable timeout (default 3 minutes)".to_string(),
            "Default chat from TELEGRAM_CHAT_ID".to_string(),
        ]
    }

    fn cursor_store(&self) -> &CursorStore {
        &self.cursor
    }

    /// Send a text message to a chat via sendMessage API.
    async fn send(&self, text: &str, target: &str) -> Result<SentMessage, ChannelError> {
        self.check_configured()?;
        if text.trim().is_empty() {
            return Err(ChannelError::InvalidMessage("message text is empty".to_string()));
        }
        let chat_id = target.trim();
        if !is_valid_chat_target(chat_id) {
            return Err(ChannelError::InvalidTarget(format!(
                "telegram chat must be a numeric id or @username, got {:?}",
                target
            )));
        }
        let url = self.method_url("sendMessage")?;
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        log::info!("telegram: sending to chat {}: {}", chat_id, preview(text));
        let res = self
            .client
            .post(&url)
            .json(&body)
            .timeout(SEND_TIMEOUT)
            .send()
            .await?;
        let msg: TelegramMessage = Self::read_result(res, "sendMessage").await?;
        Ok(SentMessage {
            id: Some(msg.message_id.to_string()),
            target: msg.chat.id.to_string(),
            sent_at: timestamp_from_unix(msg.date),
            text: text.to_string(),
        })
    }

    async fn poll_since(&self, cursor: Cursor) -> Result<PollBatch, ChannelError> {
        let updates = self.get_updates(cursor.value()).await?;
        let next_cursor = updates
            .iter()
            .map(|u| Cursor(u.update_id + 1))
            .max()
            .map_or(cursor, |c| c.max(cursor));
        let messages = updates
            .into_iter()
            .filter_map(TelegramUpdate::into_inbound)
            .collect();
        Ok(PollBatch {
            messages,
            next_cursor,
        })
    }

    /// getMe: returns the bot's @username.
    async fn probe(&self) -> Result<String, ChannelError> {
        let url = self.method_url("getMe")?;
        let res = self.client.get(&url).timeout(SEND_TIMEOUT).send().await?;
        let me: TelegramUser = Self::read_result(res, "getMe").await?;
        Ok(me
            .username
            .map(|u| format!("@{}", u))
            .unwrap_or_else(|| me.id.to_string()))
    }

    /// Skip the backlog: anything already queued before the wait starts is not a reply.
    /// Full pages mean more may be queued, so the drain keeps reading until a short page.
    async fn prepare_wait(&self) -> Result<(), ChannelError> {
        let mut skipped = 0;
        loop {
            let updates = self.get_updates(self.cursor.current().value()).await?;
            let page_full = updates.len() >= POLL_LIMIT as usize;
            skipped += updates.len();
            if let Some(next) = updates.iter().map(|u| Cursor(u.update_id + 1)).max() {
                self.cursor.advance(next);
            }
            if !page_full {
                break;
            }
        }
        if skipped > 0 {
            log::debug!(
                "telegram: skipped {} queued update(s), cursor now {}",
                skipped,
                self.cursor.current().value()
            );
        }
        Ok(())
    }
}

/// Resolve Telegram bot API base URL (for tests or custom endpoints).
pub fn telegram_api_base() -> String {
    std::env::var("TELEGRAM_API_BASE")
        .map(|s| s.trim_end_matches('/').to_string())
        .unwrap_or_else(|_| TELEGRAM_API_BASE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_target_validation() {
        assert!(is_valid_chat_target("123456"));
        assert!(is_valid_chat_target("-1001234567890"));
        assert!(is_valid_chat_target("@some_bot"));
        assert!(!is_valid_chat_target(""));
        assert!(!is_valid_chat_target("@"));
        assert!(!is_valid_chat_target("-"));
        assert!(!is_valid_chat_target("+15551230000"));
        assert!(!is_valid_chat_target("chat 42"));
    }

    #[test]
    fn update_converts_to_inbound() {
        let update: TelegramUpdate = serde_json::from_value(serde_json::json!({
            "update_id": 41,
            "message": {
                "message_id": 7,
                "date": 1_700_000_000,
                "chat": { "id": 99, "type": "private" },
                "from": { "id": 99, "username": "alice", "first_name": "Alice" },
                "text": "pong",
                "reply_to_message": { "message_id": 6, "date": 1_699_999_990, "chat": { "id": 99 } }
            }
        }))
        .unwrap();
        let inbound = update.into_inbound().unwrap();
        assert_eq!(inbound.sender, "99");
        assert_eq!(inbound.text, "pong");
        assert_eq!(inbound.position, Cursor(42));
        assert_eq!(inbound.thread_ref.as_deref(), Some("6"));
        assert_eq!(inbound.message_id.as_deref(), Some("7"));
        assert_eq!(inbound.sender_name.as_deref(), Some("alice"));
        assert_eq!(inbound.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn update_without_message_is_skipped() {
        let update: TelegramUpdate =
            serde_json::from_value(serde_json::json!({ "update_id": 5 })).unwrap();
        assert!(update.into_inbound().is_none());
    }

    #[tokio::test]
    async fn empty_poll_keeps_cursor() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/botT/getUpdates")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "8".into()))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":[]}"#)
            .expect(2)
            .create_async()
            .await;
        let channel =
            TelegramChannel::new(Some("T".to_string()), None).with_api_base(server.url());
        for _ in 0..2 {
            let batch = channel.poll_since(Cursor(8)).await.unwrap();
            assert!(batch.messages.is_empty());
            assert_eq!(batch.next_cursor, Cursor(8));
        }
        assert_eq!(channel.cursor_store().current(), Cursor(0));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn poll_http_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/botT/getUpdates")
            .with_status(502)
            .with_body("Bad Gateway")
            .create_async()
            .await;
        let channel =
            TelegramChannel::new(Some("T".to_string()), None).with_api_base(server.url());
        let err = channel.poll_since(Cursor(0)).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn drain_reads_every_full_page() {
        let mut server = mockito::Server::new_async().await;
        let first_page: Vec<serde_json::Value> = (1..=100)
            .map(|id| {
                serde_json::json!({ "update_id": id, "message": { "message_id": id,
                    "date": 1_700_000_000, "chat": { "id": 42 }, "text": "old" } })
            })
            .collect();
        let first = server
            .mock("GET", "/botT/getUpdates")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(serde_json::json!({ "ok": true, "result": first_page }).to_string())
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/botT/getUpdates")
            .match_query(mockito::Matcher::UrlEncoded("offset".into(), "101".into()))
            .with_status(200)
            .with_body(
                r#"{"ok":true,"result":[{"update_id":101,"message":{"message_id":101,"date":1700000000,"chat":{"id":42},"text":"older"}}]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let channel =
            TelegramChannel::new(Some("T".to_string()), None).with_api_base(server.url());
        channel.prepare_wait().await.unwrap();
        assert_eq!(channel.cursor_store().current(), Cursor(102));
        first.assert_async().await;
        second.assert_async().await;
    }

    #[test]
    fn response_without_result_parses() {
        let data: ApiResponse<TelegramMessage> =
            serde_json::from_str(r#"{"ok":false,"description":"Unauthorized"}"#).unwrap();
        assert!(!data.ok);
        assert!(data.result.is_none());
        assert_eq!(data.description.as_deref(), Some("Unauthorized"));
    }

    #[tokio::test]
    async fn unconfigured_send_fails_without_request() {
        let channel = TelegramChannel::new(None, Some("1".to_string()))
            .with_api_base("http://127.0.0.1:9");
        let err = channel.send("hi", "1").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }
}
