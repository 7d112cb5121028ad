/// HTTP status/control API for the authentication bridge.
///
/// Stateless on its own: every handler reads or signals through the shared
/// `ConnectionRegister`, so restarting the server never loses pairing state.
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::auth::{AuthStatus, ConnectionRegister, StatusTag};

pub const QR_PATH: &str = "/api/qr";
pub const REAUTH_PATH: &str = "/api/reauth";
pub const STATUS_PATH: &str = "/api/status";
pub const HEALTH_PATH: &str = "/api/health";

pub const MSG_CONNECTED: &str = "WhatsApp is connected and ready";
pub const MSG_PENDING: &str = "Scan this QR code with WhatsApp to authenticate";
pub const MSG_EXPIRED: &str = "QR code has expired. Please restart the authentication process";
pub const MSG_DISCONNECTED: &str = "WhatsApp is not connected. Starting authentication...";
pub const MSG_REAUTH: &str = "Re-authentication triggered. Check /api/qr for the new QR code";
pub const MSG_METHOD_NOT_ALLOWED: &str = "Method not allowed";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct GatewayState {
    register: Arc<ConnectionRegister>,
}

/// Response body for /api/qr.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrResponse {
    pub status: StatusTag,
    /// Raw pairing challenge, only while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
    /// Base64 payload of the challenge, only while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
    pub message: String,
    /// RFC 3339 issue time, only while pending.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl QrResponse {
    pub fn from_status(status: &AuthStatus) -> Self {
        let tag = status.tag();
        let mut resp = Self {
            status: tag,
            qr_code: None,
            qr_image: None,
            message: status_message(tag).to_string(),
            timestamp: None,
        };
        if let AuthStatus::Pending {
            challenge,
            issued_at,
        } = status
        {
            resp.qr_image = Some(encode_qr_image(challenge));
            resp.qr_code = Some(challenge.clone());
            resp.timestamp = Some(issued_at.to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        resp
    }
}

/// Response body for /api/reauth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReauthResponse {
    pub success: bool,
    pub message: String,
}

/// Response body for /api/status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSummary {
    pub connected: bool,
    pub status: StatusTag,
}

/// Fixed guidance text for each status.
pub fn status_message(tag: StatusTag) -> &'static str {
    match tag {
        StatusTag::Connected => MSG_CONNECTED,
        StatusTag::Pending => MSG_PENDING,
        StatusTag::Expired => MSG_EXPIRED,
        StatusTag::Disconnected => MSG_DISCONNECTED,
    }
}

/// Image payload for a challenge. Rasterizing the QR is left to the client;
/// the payload carries the challenge bytes in base64.
pub fn encode_qr_image(challenge: &str) -> String {
    BASE64.encode(challenge.as_bytes())
}

/// Build the HTTP API router.
pub fn build_router(register: Arc<ConnectionRegister>) -> Router {
    Router::new()
        .route(QR_PATH, any(qr_handler))
        .route(REAUTH_PATH, any(reauth_handler))
        .route(STATUS_PATH, get(status_handler))
        .route(HEALTH_PATH, get(health_handler))
        .with_state(GatewayState { register })
}

/// ANY /api/qr: current pairing status, with the challenge while pending.
async fn qr_handler(State(state): State<GatewayState>) -> Json<QrResponse> {
    let status = state.register.status();
    debug!("QR status poll: status={}", status.tag());
    Json(QrResponse::from_status(&status))
}

/// POST /api/reauth: ask the session owner for a fresh challenge.
async fn reauth_handler(State(state): State<GatewayState>, method: Method) -> Response {
    if method != Method::POST {
        debug!("reauth: rejected method {}", method);
        return (StatusCode::METHOD_NOT_ALLOWED, MSG_METHOD_NOT_ALLOWED).into_response();
    }
    state.register.request_reauthentication();
    Json(ReauthResponse {
        success: true,
        message: MSG_REAUTH.to_string(),
    })
    .into_response()
}

/// GET /api/status: connection probe without the challenge payload.
async fn status_handler(State(state): State<GatewayState>) -> Json<ConnectionSummary> {
    let status = state.register.status();
    Json(ConnectionSummary {
        connected: status.is_connected(),
        status: status.tag(),
    })
}

/// GET /api/health
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": crate::VERSION
    }))
}

/// Start the HTTP API server. Returns the server task and the bound address
/// (port 0 picks an ephemeral port).
pub async fn start(
    host: &str,
    port: u16,
    register: Arc<ConnectionRegister>,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr)> {
    let app = build_router(register);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!("HTTP API listening on {}", local_addr);

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP API server error: {}", e);
        }
    });

    Ok((handle, local_addr))
}
