
use crate::auth::{ConnectionRegister, StatusTag};
use crate::client::{BridgeClient, DEFAULT_BRIDGE_URL};
use crate::config::{Config, load_config};
use crate::session::{OwnerOptions, SessionOwner, SimulatedSession};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "wabridge")]
#[command(about = "WhatsApp Web authentication bridge")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the bridge (HTTP API + session owner)
    Serve {
        /// Config file (defaults to ~/.wabridge/config.json)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },
    /// Show the pairing status of a running bridge
    Status {
        #[arg(long, default_value = DEFAULT_BRIDGE_URL)]
        url: String,
        /// Keep polling up to this many seconds until the bridge is connected
        #[arg(long, short = 'w')]
        wait: Option<u64>,
    },
    /// Ask a running bridge to restart pairing
    Reauth {
        #[arg(long, default_value = DEFAULT_BRIDGE_URL)]
        url: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, host, port } => {
            serve(config, host, port).await?;
        }
        Commands::Status { url, wait } => {
            status(&url, wait.map(Duration::from_secs)).await?;
        }
        Commands::Reauth { url } => {
            reauth(&url).await?;
        }
    }

    Ok(())
}

/// Command-line flags win over the file and environment.
fn apply_cli_overrides(config: &mut Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    config
        .validate()
        .with_context(|| "Invalid command-line overrides")?;
    Ok(())
}

async fn serve(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    info!("Loading configuration...");
    let mut config = load_config(config_path.as_deref())?;
    apply_cli_overrides(&mut config, host, port)?;

    let register = Arc::new(ConnectionRegister::new(config.auth.challenge_ttl()));

    let (server_task, addr) =
        crate::gateway::start(&config.gateway.host, config.gateway.port, register.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to start HTTP API on {}:{}",
                    config.gateway.host, config.gateway.port
                )
            })?;
    println!("HTTP API listening on http://{}", addr);

    let session = Arc::new(SimulatedSession::new(
        config.session.auto_pair_after_secs.map(Duration::from_secs),
    ));
    let mut owner = SessionOwner::new(session, register, OwnerOptions::from(&config));
    owner.start().await?;

    info!("bridge started");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\nShutting down...");
        }
        _ = server_task => {
            warn!("HTTP API server exited");
        }
    }
    owner.stop().await?;

    Ok(())
}

async fn status(url: &str, wait: Option<Duration>) -> Result<()> {
    let client = BridgeClient::new(url)?;
    let resp = client
        .qr_status()
        .await
        .with_context(|| format!("Could not reach bridge at {}", client.base_url()))?;

    println!("Status: {}", resp.status);
    println!("{}", resp.message);
    if resp.status == StatusTag::Pending
        && let Some(code) = resp.qr_code.as_deref()
    {
        if let Err(e) = qr2term::print_qr(code) {
            warn!("qr2term failed: {}", e);
            println!("Raw QR code data: {}", code);
        }
        if let Some(ts) = resp.timestamp {
            println!("Issued at {}", ts);
        }
    }

    if let Some(timeout) = wait
        && resp.status != StatusTag::Connected
    {
        println!("Waiting up to {}s for WhatsApp to connect...", timeout.as_secs());
        if client.wait_for_connection(timeout).await? {
            println!("WhatsApp is now connected");
        } else {
            anyhow::bail!(
                "Timeout waiting for WhatsApp connection after {} seconds",
                timeout.as_secs()
            );
        }
    }
    Ok(())
}

async fn reauth(url: &str) -> Result<()> {
    let client = BridgeClient::new(url)?;
    let resp = client
        .request_reauth()
        .await
        .with_context(|| format!("Reauthentication request to {} failed", client.base_url()))?;
    println!("{}", resp.message);
    Ok(())
}
