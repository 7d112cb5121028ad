//! HTTP client for the bridge API, as used by the tool layer.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::StatusTag;
use crate::errors::{BridgeError, BridgeResult};
use crate::gateway::{
    ConnectionSummary, HEALTH_PATH, QR_PATH, QrResponse, REAUTH_PATH, ReauthResponse, STATUS_PATH,
};

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:8080";

/// Per-request timeout for bridge calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Gap between status polls while waiting for pairing.
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(base_url: &str) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BridgeError::Internal(e.into()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET /api/qr
    pub async fn qr_status(&self) -> BridgeResult<QrResponse> {
        let resp = self.http.get(self.url(QR_PATH)).send().await;
        decode(QR_PATH, resp).await
    }

    /// GET /api/status
    pub async fn connection(&self) -> BridgeResult<ConnectionSummary> {
        let resp = self.http.get(self.url(STATUS_PATH)).send().await;
        decode(STATUS_PATH, resp).await
    }

    /// POST /api/reauth. Success only means the request was accepted; poll
    /// `qr_status` for the new challenge.
    pub async fn request_reauth(&self) -> BridgeResult<ReauthResponse> {
        let resp = self.http.post(self.url(REAUTH_PATH)).send().await;
        decode(REAUTH_PATH, resp).await
    }

    /// Poll `/api/qr` until the bridge reports connected. Returns `Ok(false)`
    /// if `timeout` passes first. Retryable errors keep the loop going; any
    /// other error ends it.
    pub async fn wait_for_connection(&self, timeout: Duration) -> BridgeResult<bool> {
        self.poll_until_connected(timeout, CONNECTION_POLL_INTERVAL).await
    }

    async fn poll_until_connected(
        &self,
        timeout: Duration,
        interval: Duration,
    ) -> BridgeResult<bool> {
        let poll = async {
            loop {
                match self.qr_status().await {
                    Ok(resp) if resp.status == StatusTag::Connected => return Ok(()),
                    Ok(resp) => debug!("waiting for connection, bridge reports {}", resp.status),
                    Err(e) if e.is_retryable() => warn!("bridge poll failed, retrying: {}", e),
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(interval).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result.map(|()| true),
            Err(_) => {
                debug!(
                    "timed out waiting for WhatsApp connection after {}s",
                    timeout.as_secs()
                );
                Ok(false)
            }
        }
    }

    /// GET /api/health. Any transport failure or non-2xx reads as unhealthy.
    pub async fn health(&self) -> bool {
        match self.http.get(self.url(HEALTH_PATH)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("bridge health check failed: {}", e);
                false
            }
        }
    }
}

async fn decode<T: DeserializeOwned>(
    path: &str,
    resp: reqwest::Result<reqwest::Response>,
) -> BridgeResult<T> {
    let resp = resp.map_err(|e| transport_error(path, &e))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(status_error(path, status, body.trim()));
    }
    resp.json::<T>().await.map_err(|e| BridgeError::Bridge {
        message: format!("{}: invalid response body: {}", path, e),
        retryable: false,
    })
}

fn transport_error(path: &str, e: &reqwest::Error) -> BridgeError {
    let retryable = e.is_timeout() || e.is_connect() || e.is_request();
    let message = if e.is_timeout() {
        format!(
            "{}: request timed out after {}s, the bridge may be slow or unresponsive",
            path,
            REQUEST_TIMEOUT.as_secs()
        )
    } else {
        format!("{}: {}", path, e)
    };
    BridgeError::Bridge { message, retryable }
}

fn status_error(path: &str, status: StatusCode, body: &str) -> BridgeError {
    let message = if body.is_empty() {
        format!("{}: HTTP {}", path, status.as_u16())
    } else {
        format!("{}: HTTP {}: {}", path, status.as_u16(), body)
    };
    BridgeError::Bridge {
        message,
        retryable: status.is_server_error(),
    }
}
