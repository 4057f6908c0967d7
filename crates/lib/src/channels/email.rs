//! Email channel: send-only, via the Resend HTTP API (`POST /emails`).

use crate::channels::{preview, ChannelError};
use crate::config::{self, Config};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RESEND_API_BASE: &str = "https://api.resend.com";
const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// One outgoing email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub to: String,
    pub subject: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
}

/// What Resend returned for an accepted email.
#[derive(Debug, Clone, Serialize)]
pub struct EmailReceipt {
    pub id: String,
    pub to: String,
    pub subject: String,
}

#[derive(Debug, Serialize)]
struct ResendPayload<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Resend-backed email sender.
pub struct EmailChannel {
    api_key: Option<String>,
    from: Option<String>,
    default_to: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl EmailChannel {
    pub fn new(api_key: Option<String>, from: Option<String>, default_to: Option<String>) -> Self {
        Self {
            api_key,
            from,
            default_to,
            api_base: RESEND_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config + env (RESEND_API_KEY, FROM_EMAIL).
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_resend_api_key(config),
            config::resolve_from_email(config),
            config.channels.email.default_to.clone(),
        )
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some() && self.from.is_some()
    }

    pub fn default_to(&self) -> Option<&str> {
        self.default_to.as_deref()
    }

    pub fn capabilities(&self) -> Vec<String> {
        vec![
            "Send plain-text email with optional HTML body".to_string(),
            "Send only; replies are not awaited".to_string(),
        ]
    }

    /// Send one email. Validates addresses before any request is made.
    pub async fn send_email(&self, req: &EmailRequest) -> Result<EmailReceipt, ChannelError> {
        let (Some(api_key), Some(from)) = (self.api_key.as_deref(), self.from.as_deref()) else {
            return Err(ChannelError::NotConfigured(
                "Email not configured. Set RESEND_API_KEY and FROM_EMAIL".to_string(),
            ));
        };
        if !config::is_valid_email(&req.to) {
            return Err(ChannelError::InvalidTarget(
                "invalid recipient email address".to_string(),
            ));
        }
        if !config::is_valid_email(from) {
            return Err(ChannelError::NotConfigured(
                "invalid sender email address".to_string(),
            ));
        }
        let payload = ResendPayload {
            from,
            to: vec![req.to.trim()],
            subject: &req.subject,
            text: &req.body,
            html: req.html_body.as_deref(),
        };
        log::info!("email: sending to {} with subject: {}", req.to, preview(&req.subject));
        let res = self
            .client
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(api_key)
            .json(&payload)
            .timeout(SEND_TIMEOUT)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        let parsed: Option<ResendResponse> = serde_json::from_str(&body).ok();
        if !status.is_success() {
            let detail = parsed
                .and_then(|r| r.message)
                .unwrap_or(body);
            log::error!("email: resend api error: {} {}", status, detail);
            return Err(ChannelError::Transport(format!(
                "resend api error: {} {}",
                status, detail
            )));
        }
        let id = parsed
            .and_then(|r| r.id)
            .unwrap_or_else(|| "unknown".to_string());
        log::info!("email: sent, message id {}", id);
        Ok(EmailReceipt {
            id,
            to: req.to.trim().to_string(),
            subject: req.subject.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(to: &str) -> EmailRequest {
        EmailRequest {
            to: to.to_string(),
            subject: "BTC Price Alert".to_string(),
            body: "BTC: $45,000.00".to_string(),
            html_body: None,
        }
    }

    #[tokio::test]
    async fn sends_via_resend() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/emails")
            .match_header("authorization", "Bearer re_test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "from": "bot@example.com",
                "to": ["ops@example.com"],
                "subject": "BTC Price Alert"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"4ef9a417-02e9-4d39-ad75-9611e0fcc33c"}"#)
            .create_async()
            .await;

        let email = EmailChannel::new(
            Some("re_test".to_string()),
            Some("bot@example.com".to_string()),
            None,
        )
        .with_api_base(server.url());
        let receipt = email.send_email(&request("ops@example.com")).await.unwrap();
        assert_eq!(receipt.id, "4ef9a417-02e9-4d39-ad75-9611e0fcc33c");
        assert_eq!(receipt.to, "ops@example.com");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_is_transport() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/emails")
            .with_status(422)
            .with_body(r#"{"statusCode":422,"message":"Invalid `to` field"}"#)
            .create_async()
            .await;
        let email = EmailChannel::new(
            Some("re_test".to_string()),
            Some("bot@example.com".to_string()),
            None,
        )
        .with_api_base(server.url());
        let err = email.send_email(&request("ops@example.com")).await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("Invalid `to` field"));
    }

    #[tokio::test]
    async fn rejects_bad_recipient_and_missing_config() {
        let email = EmailChannel::new(None, None, None);
        assert!(!email.is_configured());
        let err = email.send_email(&request("ops@example.com")).await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));

        let email = EmailChannel::new(
            Some("re_test".to_string()),
            Some("bot@example.com".to_string()),
            None,
        );
        let err = email.send_email(&request("nobody")).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidTarget(_)));
    }
}
