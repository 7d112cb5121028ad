use anyhow::{Context, Result};
use std::path::PathBuf;

/// Base directory for wabridge state (`$WABRIDGE_HOME` or `~/.wabridge`).
pub fn get_wabridge_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os("WABRIDGE_HOME") {
        return Ok(PathBuf::from(home));
    }
    Ok(dirs::home_dir()
        .context("Could not determine home directory")?
        .join(".wabridge"))
}

/// Reconnect delay in seconds: `base * 2^attempt`, capped at `max`, plus up
/// to 25% jitter.
pub fn exponential_backoff_delay(attempt: u32, base_delay_secs: u64, max_delay_secs: u64) -> u64 {
    let delay = (base_delay_secs as f64 * 2.0_f64.powi(attempt.min(63) as i32)) as u64;
    let capped = delay.min(max_delay_secs);
    // Add up to 25% jitter to avoid thundering herd
    let jitter = (capped as f64 * 0.25 * fastrand::f64()) as u64;
    capped.saturating_add(jitter)
}
