use thiserror::Error;

/// Typed error hierarchy for wabridge.
///
/// Use at module boundaries (config loading, session driving, bridge HTTP calls).
/// Internal/leaf functions can continue using `anyhow::Result`; the `Internal` variant
/// allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge request failed: {message}")]
    Bridge { message: String, retryable: bool },

    #[error("Session error: {0}")]
    Session(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using `BridgeError`.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Whether the caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Bridge { retryable, .. } => *retryable,
            Self::Internal(_) => true,
            Self::Config(_) | Self::Session(_) => false,
        }
    }
}
