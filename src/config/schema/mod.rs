use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::errors::BridgeError;

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

fn default_qr_timeout_secs() -> u64 {
    crate::auth::DEFAULT_CHALLENGE_TTL.as_secs()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// How long a published QR challenge stays actionable.
    #[serde(default = "default_qr_timeout_secs", rename = "qrTimeoutSecs")]
    pub qr_timeout_secs: u64,
    /// Render each new challenge as a QR code on the terminal.
    #[serde(default = "default_true", rename = "printQr")]
    pub print_qr: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            qr_timeout_secs: default_qr_timeout_secs(),
            print_qr: true,
        }
    }
}

impl AuthConfig {
    pub fn challenge_ttl(&self) -> Duration {
        Duration::from_secs(self.qr_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Longest wait the owner may sit out between pairing attempts.
pub const MAX_RECONNECT_SECS: u64 = 3600;

fn default_reconnect_base_secs() -> u64 {
    5
}

fn default_reconnect_max_secs() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Simulated session only: pair automatically this long after a challenge.
    #[serde(default, rename = "autoPairAfterSecs")]
    pub auto_pair_after_secs: Option<u64>,
    #[serde(default = "default_reconnect_base_secs", rename = "reconnectBaseSecs")]
    pub reconnect_base_secs: u64,
    #[serde(default = "default_reconnect_max_secs", rename = "reconnectMaxSecs")]
    pub reconnect_max_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_pair_after_secs: None,
            reconnect_base_secs: default_reconnect_base_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), BridgeError> {
        self.validate_gateway()?;
        self.validate_auth()?;
        self.validate_session()?;
        Ok(())
    }

    fn validate_gateway(&self) -> Result<(), BridgeError> {
        if self.gateway.host.trim().is_empty() {
            return Err(BridgeError::Config("gateway.host must not be empty".into()));
        }
        if self.gateway.port == 0 {
            return Err(BridgeError::Config("gateway.port must be > 0".into()));
        }
        if self.gateway.port < 1024 {
            warn!(
                "gateway.port {} is a privileged port (< 1024), may require elevated permissions",
                self.gateway.port
            );
        }
        Ok(())
    }

    fn validate_auth(&self) -> Result<(), BridgeError> {
        if self.auth.qr_timeout_secs == 0 {
            return Err(BridgeError::Config(
                "auth.qrTimeoutSecs must be > 0".into(),
            ));
        }
        if self.auth.qr_timeout_secs > 3600 {
            warn!(
                "auth.qrTimeoutSecs is very long ({}s), WhatsApp rotates challenges far sooner",
                self.auth.qr_timeout_secs
            );
        }
        Ok(())
    }

    fn validate_session(&self) -> Result<(), BridgeError> {
        let s = &self.session;
        if s.reconnect_max_secs > MAX_RECONNECT_SECS {
            return Err(BridgeError::Config(format!(
                "session.reconnectMaxSecs ({}) must be <= {}",
                s.reconnect_max_secs, MAX_RECONNECT_SECS
            )));
        }
        if s.reconnect_base_secs > s.reconnect_max_secs {
            return Err(BridgeError::Config(format!(
                "session.reconnectBaseSecs ({}) must be <= session.reconnectMaxSecs ({})",
                s.reconnect_base_secs, s.reconnect_max_secs
            )));
        }
        Ok(())
    }
}
