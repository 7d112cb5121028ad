pub mod simulated;

pub use simulated::SimulatedSession;

use crate::auth::ConnectionRegister;
use crate::config::Config;
use crate::errors::{BridgeError, BridgeResult};
use crate::utils::exponential_backoff_delay;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Events reported by the protocol session while a pairing attempt runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new QR challenge was issued; it supersedes any earlier one.
    Challenge(String),
    /// Pairing completed (or stored credentials were accepted).
    Paired,
    /// The device was unlinked; credentials are gone.
    LoggedOut,
    /// Transport dropped. The owner reconnects with backoff.
    Disconnected,
}

/// The live WhatsApp Web session, seen only through its pairing interface.
#[async_trait]
pub trait PairingSession: Send + Sync {
    fn name(&self) -> &str;

    /// Begin a connection/pairing attempt. Events flow until the session ends
    /// or the receiver is dropped.
    async fn start_pairing(&self) -> Result<mpsc::Receiver<SessionEvent>>;

    /// Drop stored credentials so the next attempt pairs from scratch.
    async fn logout(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct OwnerOptions {
    pub print_qr: bool,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
}

impl Default for OwnerOptions {
    fn default() -> Self {
        Self {
            print_qr: false,
            reconnect_base_secs: 5,
            reconnect_max_secs: 60,
        }
    }
}

impl From<&Config> for OwnerOptions {
    fn from(config: &Config) -> Self {
        Self {
            print_qr: config.auth.print_qr,
            reconnect_base_secs: config.session.reconnect_base_secs,
            reconnect_max_secs: config.session.reconnect_max_secs,
        }
    }
}

/// Why a pairing attempt stopped being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionOutcome {
    ReauthRequested,
    LoggedOut,
    Ended { paired: bool },
}

/// Owns the protocol session and is the only writer of the register.
pub struct SessionOwner {
    session: Arc<dyn PairingSession>,
    register: Arc<ConnectionRegister>,
    options: OwnerOptions,
    running: Arc<tokio::sync::Mutex<bool>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SessionOwner {
    pub fn new(
        session: Arc<dyn PairingSession>,
        register: Arc<ConnectionRegister>,
        options: OwnerOptions,
    ) -> Self {
        Self {
            session,
            register,
            options,
            running: Arc::new(tokio::sync::Mutex::new(false)),
            handle: None,
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            warn!("session owner already started");
            return Ok(());
        }
        *self.running.lock().await = true;

        let task = tokio::spawn(run_owner(
            self.session.clone(),
            self.register.clone(),
            self.options.clone(),
            self.running.clone(),
        ));
        self.handle = Some(task);
        info!(
            "session owner started for {} session (pairing in background)",
            self.session.name()
        );
        Ok(())
    }

    /// Stop the owner loop. The loop only exits on its own by panicking, so
    /// a task that already finished is reported as a session failure.
    pub async fn stop(&mut self) -> BridgeResult<()> {
        *self.running.lock().await = false;
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.is_finished() {
            return match handle.await {
                Err(e) if e.is_panic() => {
                    error!("{} session owner panicked", self.session.name());
                    Err(BridgeError::Session(format!(
                        "{} session owner panicked, status updates stopped",
                        self.session.name()
                    )))
                }
                _ => Ok(()),
            };
        }
        handle.abort();
        info!("session owner stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

async fn run_owner(
    session: Arc<dyn PairingSession>,
    register: Arc<ConnectionRegister>,
    options: OwnerOptions,
    running: Arc<tokio::sync::Mutex<bool>>,
) {
    let mut attempt = 0u32;
    loop {
        if !*running.lock().await {
            break;
        }

        debug!("starting {} pairing attempt", session.name());
        let mut events = match session.start_pairing().await {
            Ok(rx) => rx,
            Err(e) => {
                error!("failed to start {} session: {}", session.name(), e);
                backoff(&mut attempt, &options, session.as_ref(), &register).await;
                continue;
            }
        };

        match drive_session(&mut events, &register, options.print_qr).await {
            SessionOutcome::ReauthRequested => {
                drop(events);
                reset_pairing(session.as_ref(), &register).await;
                attempt = 0;
            }
            SessionOutcome::LoggedOut => {
                drop(events);
                warn!("WhatsApp session logged out, pairing again");
                register.mark_logged_out();
                backoff(&mut attempt, &options, session.as_ref(), &register).await;
            }
            SessionOutcome::Ended { paired } => {
                drop(events);
                if paired {
                    attempt = 0;
                }
                if *running.lock().await {
                    warn!("WhatsApp session ended, reconnecting");
                    backoff(&mut attempt, &options, session.as_ref(), &register).await;
                }
            }
        }
    }
}

/// Forward session events into the register until the attempt ends or a
/// reauthentication request arrives.
async fn drive_session(
    events: &mut mpsc::Receiver<SessionEvent>,
    register: &ConnectionRegister,
    print_qr: bool,
) -> SessionOutcome {
    let mut paired = false;
    loop {
        tokio::select! {
            () = register.wait_for_reauth() => {
                return SessionOutcome::ReauthRequested;
            }
            event = events.recv() => {
                match event {
                    Some(SessionEvent::Challenge(code)) => {
                        register.publish_challenge(&code);
                        if print_qr {
                            print_challenge(&code);
                        }
                        info!("WhatsApp QR challenge issued");
                    }
                    Some(SessionEvent::Paired) => {
                        paired = true;
                        register.mark_connected();
                    }
                    Some(SessionEvent::LoggedOut) => return SessionOutcome::LoggedOut,
                    Some(SessionEvent::Disconnected) | None => {
                        return SessionOutcome::Ended { paired };
                    }
                }
            }
        }
    }
}

/// Drop the current pairing so the next attempt issues a fresh challenge.
async fn reset_pairing(session: &dyn PairingSession, register: &ConnectionRegister) {
    info!("reauthentication requested, restarting {} pairing", session.name());
    if let Err(e) = session.logout().await {
        warn!("{} logout before reauthentication failed: {}", session.name(), e);
    }
    register.mark_logged_out();
}

/// Sleep before the next attempt. A reauthentication request cuts the wait
/// short and resets the attempt counter.
async fn backoff(
    attempt: &mut u32,
    options: &OwnerOptions,
    session: &dyn PairingSession,
    register: &ConnectionRegister,
) {
    let delay = exponential_backoff_delay(
        *attempt,
        options.reconnect_base_secs,
        options.reconnect_max_secs,
    );
    *attempt = attempt.saturating_add(1);
    if delay > 0 {
        info!("next {} pairing attempt in {} seconds", session.name(), delay);
    }
    tokio::select! {
        () = tokio::time::sleep(tokio::time::Duration::from_secs(delay)) => {}
        () = register.wait_for_reauth() => {
            reset_pairing(session, register).await;
            *attempt = 0;
        }
    }
}

/// Render a challenge on the terminal for local scanning.
fn print_challenge(code: &str) {
    println!("\nWhatsApp QR Code:");
    if let Err(e) = qr2term::print_qr(code) {
        warn!("qr2term failed: {}, printing raw challenge", e);
        println!("Raw QR code data: {}", code);
    }
    println!("\nScan with WhatsApp: Settings > Linked Devices > Link a Device");
}

#[cfg(test)]
mod tests;
