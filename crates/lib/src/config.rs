//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.courier/config.json`) and environment.
//! Every credential can be supplied through the environment instead of the file; env wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (Telegram, Signal, email).
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Gateway bind, port, auth and log settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the HTTP API (default 15152).
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Auth settings. When absent, defaults to no auth for loopback bind.
    #[serde(default)]
    pub auth: GatewayAuthConfig,

    /// Default log filter while serving (overridden by RUST_LOG).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Gateway auth: token or none (loopback-only when none).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAuthConfig {
    /// "none" = no shared secret (only safe when bind is loopback). "token" = require a bearer token.
    #[serde(default)]
    pub mode: GatewayAuthMode,

    /// Shared secret for HTTP requests. Overridden by COURIER_GATEWAY_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayAuthMode {
    /// No auth; allow only when bind is loopback.
    #[default]
    None,

    /// Require `Authorization: Bearer <token>` on every request except health.
    Token,
}

fn default_gateway_port() -> u16 {
    15152
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            auth: GatewayAuthConfig::default(),
            log_level: default_log_level(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub telegram: TelegramChannelConfig,
    #[serde(default)]
    pub signal: SignalChannelConfig,
    #[serde(default)]
    pub email: EmailChannelConfig,
}

/// Telegram channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramChannelConfig {
    /// Bot token from BotFather. Overridden by TELEGRAM_BOT_TOKEN env when set.
    pub bot_token: Option<String>,
    /// Default chat to send to when no target is given. Overridden by TELEGRAM_CHAT_ID.
    pub chat_id: Option<String>,
}

/// Signal channel config (drives a local `signal-cli` install).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalChannelConfig {
    /// Registered account number, e.g. "+15551230000". Overridden by SIGNAL_PHONE_NUMBER.
    pub phone_number: Option<String>,
    /// Path to the signal-cli binary. Overridden by SIGNAL_CLI_PATH.
    #[serde(default = "default_signal_cli_path")]
    pub cli_path: String,
}

fn default_signal_cli_path() -> String {
    "signal-cli".to_string()
}

impl Default for SignalChannelConfig {
    fn default() -> Self {
        Self {
            phone_number: None,
            cli_path: default_signal_cli_path(),
        }
    }
}

/// Email (Resend) config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailChannelConfig {
    /// Resend API key. Overridden by RESEND_API_KEY.
    pub resend_api_key: Option<String>,
    /// Sender address. Overridden by FROM_EMAIL.
    pub from_email: Option<String>,
    /// Recipient used when the caller does not name one.
    pub default_to: Option<String>,
}

/// Read a non-empty, trimmed env var.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Trimmed, non-empty config value.
fn config_value(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the gateway token: env COURIER_GATEWAY_TOKEN overrides config.
pub fn resolve_gateway_token(config: &Config) -> Option<String> {
    env_value("COURIER_GATEWAY_TOKEN").or_else(|| config_value(&config.gateway.auth.token))
}

/// Resolve the Telegram bot token: env TELEGRAM_BOT_TOKEN overrides config.
pub fn resolve_telegram_token(config: &Config) -> Option<String> {
    env_value("TELEGRAM_BOT_TOKEN").or_else(|| config_value(&config.channels.telegram.bot_token))
}

/// Resolve the default Telegram chat: env TELEGRAM_CHAT_ID overrides config.
pub fn resolve_telegram_chat_id(config: &Config) -> Option<String> {
    env_value("TELEGRAM_CHAT_ID").or_else(|| config_value(&config.channels.telegram.chat_id))
}

/// Resolve the Signal account number: env SIGNAL_PHONE_NUMBER overrides config.
pub fn resolve_signal_phone_number(config: &Config) -> Option<String> {
    env_value("SIGNAL_PHONE_NUMBER")
        .or_else(|| config_value(&config.channels.signal.phone_number))
}

/// Resolve the signal-cli path: env SIGNAL_CLI_PATH overrides config.
pub fn resolve_signal_cli_path(config: &Config) -> String {
    env_value("SIGNAL_CLI_PATH").unwrap_or_else(|| {
        let p = config.channels.signal.cli_path.trim();
        if p.is_empty() {
            default_signal_cli_path()
        } else {
            p.to_string()
        }
    })
}

/// Resolve the Resend API key: env RESEND_API_KEY overrides config.
pub fn resolve_resend_api_key(config: &Config) -> Option<String> {
    env_value("RESEND_API_KEY").or_else(|| config_value(&config.channels.email.resend_api_key))
}

/// Resolve the sender address: env FROM_EMAIL overrides config.
pub fn resolve_from_email(config: &Config) -> Option<String> {
    env_value("FROM_EMAIL").or_else(|| config_value(&config.channels.email.from_email))
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// True if `s` looks like a Signal phone number: `+` then digits, spaces or dashes, with at least one digit.
pub fn is_valid_phone_number(s: &str) -> bool {
    let Some(rest) = s.strip_prefix('+') else {
        return false;
    };
    rest.chars().any(|c| c.is_ascii_digit())
        && rest
            .chars()
            .all(|c| c.is_ascii_digit() || c == ' ' || c == '-')
}

/// Basic email check: something on both sides of an `@`.
pub fn is_valid_email(s: &str) -> bool {
    match s.trim().split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
        None => false,
    }
}

impl Config {
    /// Reject malformed identities up front. Only checks values that are present.
    pub fn validate(&self) -> Result<()> {
        if let Some(phone) = resolve_signal_phone_number(self) {
            if !is_valid_phone_number(&phone) {
                anyhow::bail!("signal phone number must start with + and contain only digits");
            }
        }
        if let Some(from) = resolve_from_email(self) {
            if !is_valid_email(&from) {
                anyhow::bail!("invalid sender email address: {}", from);
            }
        }
        Ok(())
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("COURIER_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".courier").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the default path (or COURIER_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config: Config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config
        .validate()
        .with_context(|| format!("validating config from {}", path.display()))?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_gateway_port_and_bind() {
        let g = GatewayConfig::default();
        assert_eq!(g.port, 15152);
        assert_eq!(g.bind, "127.0.0.1");
        assert_eq!(g.log_level, "info");
    }

    #[test]
    fn parses_camel_case_channels() {
        let config: Config = serde_json::from_str(
            r#"{
                "channels": {
                    "telegram": { "botToken": "123:abc", "chatId": "42" },
                    "signal": { "phoneNumber": "+15551230000" },
                    "email": { "resendApiKey": "re_x", "fromEmail": "bot@example.com" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.channels.telegram.bot_token.as_deref(), Some("123:abc"));
        assert_eq!(config.channels.telegram.chat_id.as_deref(), Some("42"));
        assert_eq!(config.channels.signal.cli_path, "signal-cli");
        assert_eq!(
            config.channels.email.from_email.as_deref(),
            Some("bot@example.com")
        );
    }

    #[test]
    fn phone_number_validation() {
        assert!(is_valid_phone_number("+15551230000"));
        assert!(is_valid_phone_number("+1 555-123-0000"));
        assert!(!is_valid_phone_number("15551230000"));
        assert!(!is_valid_phone_number("+"));
        assert!(!is_valid_phone_number("+1555abc"));
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.io"));
        assert!(!is_valid_email("nobody"));
        assert!(!is_valid_email("@b.io"));
    }

    #[test]
    fn blank_config_values_are_ignored() {
        assert_eq!(config_value(&Some("   ".to_string())), None);
        assert_eq!(config_value(&Some(" x ".to_string())), Some("x".to_string()));
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let path = std::env::temp_dir().join("courier-missing-config-test.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.gateway.port, 15152);
    }
}
