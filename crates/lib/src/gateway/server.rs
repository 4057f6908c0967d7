//! Gateway HTTP server (single port): health, status and send endpoints over the dispatcher.

use crate::config::{self, Config};
use crate::dispatch::Dispatcher;
use crate::gateway::protocol::{EmailParams, ErrorBody, Health, SendParams};
use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    /// When Some, requests must carry `Authorization: Bearer <token>`.
    pub required_token: Option<String>,
}

/// When auth mode is token and a token is configured, returns it for request validation.
fn require_token(config: &Config) -> Option<String> {
    if config.gateway.auth.mode == config::GatewayAuthMode::Token {
        config::resolve_gateway_token(config)
    } else {
        None
    }
}

/// Run the gateway with channels built from config. Blocks until shutdown (Ctrl+C / SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    let dispatcher = Dispatcher::from_config(&config);
    run_gateway_with(config, dispatcher).await
}

/// Run the gateway over a prepared dispatcher.
/// When bind is not loopback, a gateway token must be configured or startup fails.
pub async fn run_gateway_with(config: Config, dispatcher: Dispatcher) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    let required_token = require_token(&config);
    if !config::is_loopback_bind(&bind) && required_token.is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without auth (set gateway.auth.mode to \"token\" and gateway.auth.token or COURIER_GATEWAY_TOKEN)",
            bind
        );
    }
    for status in dispatcher.status_all() {
        if status.configured {
            log::info!("channel {} ready", status.service);
        } else {
            log::warn!(
                "channel {} not configured: {}",
                status.service,
                status.detail.unwrap_or_default()
            );
        }
    }

    let state = GatewayState {
        config: Arc::new(config),
        dispatcher: Arc::new(dispatcher),
        required_token,
    };
    let port = state.config.gateway.port;
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/status", get(status_http))
        .route("/send", post(send_http))
        .route("/email", post(email_http))
        .with_state(state)
}

/// Completes on SIGINT or SIGTERM. In-flight waits are dropped with the connections.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// Some(response) when the request must be rejected.
fn check_auth(state: &GatewayState, headers: &HeaderMap) -> Option<Response> {
    let expected = state.required_token.as_deref()?;
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if provided == Some(expected) {
        None
    } else {
        Some(
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new("missing or invalid bearer token")),
            )
                .into_response(),
        )
    }
}

fn bad_request(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody::new(rejection.body_text())),
    )
        .into_response()
}

/// GET / returns a simple health JSON (for probes). Never requires auth.
async fn health_http(State(state): State<GatewayState>) -> Json<Health> {
    Json(Health {
        runtime: "running".to_string(),
        port: state.config.gateway.port,
        channels: state.dispatcher.channel_ids(),
    })
}

/// GET /status lists every channel's status.
async fn status_http(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if let Some(denied) = check_auth(&state, &headers) {
        return denied;
    }
    Json(state.dispatcher.status_all()).into_response()
}

/// POST /send runs one send-with-reply and returns its envelope. Holds the request open while waiting.
async fn send_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Json<SendParams>, JsonRejection>,
) -> Response {
    if let Some(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Json(params) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };
    log::debug!(
        "send: channel={} expect_reply={} timeout={}",
        params.channel,
        params.expect_reply,
        params.timeout
    );
    let envelope = state
        .dispatcher
        .send_with_reply(
            &params.channel,
            &params.message,
            params.target.as_deref(),
            params.expect_reply,
            params.timeout,
        )
        .await;
    Json(envelope).into_response()
}

/// POST /email sends one email.
async fn email_http(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Json<EmailParams>, JsonRejection>,
) -> Response {
    if let Some(denied) = check_auth(&state, &headers) {
        return denied;
    }
    let Json(params) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };
    let envelope = state
        .dispatcher
        .send_email(
            params.to.as_deref(),
            &params.subject,
            &params.body,
            params.html_body.as_deref(),
        )
        .await;
    Json(envelope).into_response()
}
