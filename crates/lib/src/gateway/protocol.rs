//! Gateway HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use crate::wait::DEFAULT_TIMEOUT_SECS;

fn default_timeout() -> f64 {
    DEFAULT_TIMEOUT_SECS
}

/// Body for `POST /send`: `{ "channel", "message", "target"?, "expectReply", "timeout" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    pub channel: String,
    pub message: String,
    /// Chat id / phone number / address. Falls back to the channel default.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub expect_reply: bool,
    /// Seconds to wait for a reply.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
}

/// Body for `POST /email`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailParams {
    #[serde(default)]
    pub to: Option<String>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub html_body: Option<String>,
}

/// `GET /` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub runtime: String,
    pub port: u16,
    pub channels: Vec<String>,
}

/// Error body for rejected requests (bad auth, malformed JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
