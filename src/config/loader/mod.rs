use crate::config::Config;
use crate::utils::get_wabridge_home;
use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const ENV_HOST: &str = "WABRIDGE_HOST";
pub const ENV_PORT: &str = "WABRIDGE_PORT";
pub const ENV_QR_TIMEOUT_SECS: &str = "WABRIDGE_QR_TIMEOUT_SECS";

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_wabridge_home()?.join("config.json"))
}

pub fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let default_path = get_config_path().unwrap_or_else(|_| PathBuf::from("config.json"));
    let path = config_path.unwrap_or(default_path.as_path());

    let mut config = if path.exists() {
        // Shared (read) lock: concurrent readers are fine, writers wait
        let file = fs::File::open(path)
            .with_context(|| format!("Failed to open config at {}", path.display()))?;
        file.lock_shared()
            .with_context(|| "Failed to acquire shared lock on config file")?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config JSON from {}", path.display()))?;
        debug!("loaded config from {}", path.display());
        config
    } else {
        debug!("no config at {}, using defaults", path.display());
        Config::default()
    };

    apply_env_overrides(&mut config);

    config
        .validate()
        .with_context(|| "Configuration validation failed")?;
    Ok(config)
}

/// Apply `WABRIDGE_*` environment overrides on top of the file values.
pub fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from an arbitrary lookup. Empty values are ignored,
/// unparseable ones are ignored with a warning.
fn apply_overrides_from(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(host) = get(ENV_HOST) {
        config.gateway.host = host;
    }
    if let Some(port) = get(ENV_PORT) {
        match port.trim().parse::<u16>() {
            Ok(p) => config.gateway.port = p,
            Err(_) => warn!("ignoring {}={:?}: not a valid port", ENV_PORT, port),
        }
    }
    if let Some(secs) = get(ENV_QR_TIMEOUT_SECS) {
        match secs.trim().parse::<u64>() {
            Ok(s) => config.auth.qr_timeout_secs = s,
            Err(_) => warn!(
                "ignoring {}={:?}: not a number of seconds",
                ENV_QR_TIMEOUT_SECS, secs
            ),
        }
    }
}
