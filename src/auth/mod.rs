//! Connection state register for the single WhatsApp Web session.
//!
//! The session owner is the only writer (`publish_challenge`,
//! `mark_connected`, `mark_logged_out`). Any number of readers call
//! [`ConnectionRegister::status`]; expiry is computed at read time from the
//! stored issue timestamp, never by a timer.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info};

/// How long a pairing challenge stays actionable (3 minutes).
pub const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(180);

/// Externally visible authentication status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusTag {
    Connected,
    Pending,
    Expired,
    Disconnected,
}

impl StatusTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Pending => "pending",
            Self::Expired => "expired",
            Self::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for StatusTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the register, classified against a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Connected {
        since: DateTime<Utc>,
    },
    Pending {
        challenge: String,
        issued_at: DateTime<Utc>,
    },
    /// The last challenge outlived the TTL. It stays expired until the
    /// session owner publishes a new one.
    Expired {
        issued_at: DateTime<Utc>,
    },
    Disconnected,
}

impl AuthStatus {
    pub fn tag(&self) -> StatusTag {
        match self {
            Self::Connected { .. } => StatusTag::Connected,
            Self::Pending { .. } => StatusTag::Pending,
            Self::Expired { .. } => StatusTag::Expired,
            Self::Disconnected => StatusTag::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Stored link state. A challenge and the connected flag can never coexist.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Link {
    Disconnected,
    Pending {
        challenge: String,
        issued_at: DateTime<Utc>,
    },
    Connected {
        since: DateTime<Utc>,
    },
}

#[derive(Debug)]
struct Inner {
    link: Link,
    reauth_requested: bool,
}

/// Thread-safe register of the pairing/connection state.
///
/// Construct one per process and hand it out as `Arc<ConnectionRegister>` to
/// the HTTP layer and the session owner.
pub struct ConnectionRegister {
    inner: RwLock<Inner>,
    ttl: TimeDelta,
    reauth: Notify,
}

impl ConnectionRegister {
    pub fn new(challenge_ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                link: Link::Disconnected,
                reauth_requested: false,
            }),
            ttl: TimeDelta::from_std(challenge_ttl).unwrap_or(TimeDelta::MAX),
            reauth: Notify::new(),
        }
    }

    pub fn challenge_ttl(&self) -> Duration {
        self.ttl.to_std().unwrap_or(Duration::MAX)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a freshly issued pairing challenge, superseding whatever was
    /// there before. An empty code clears the register to disconnected.
    pub fn publish_challenge(&self, code: &str) {
        let now = Utc::now();
        let mut inner = self.write();
        if code.is_empty() {
            inner.link = Link::Disconnected;
            drop(inner);
            debug!("empty pairing challenge published, register cleared");
            return;
        }
        inner.link = Link::Pending {
            challenge: code.to_string(),
            issued_at: now,
        };
        drop(inner);
        debug!("pairing challenge published (len={})", code.len());
    }

    /// Record a completed pairing. Calling it again while connected keeps the
    /// original `since` timestamp.
    pub fn mark_connected(&self) {
        let mut inner = self.write();
        if matches!(inner.link, Link::Connected { .. }) {
            return;
        }
        inner.link = Link::Connected { since: Utc::now() };
        drop(inner);
        info!("WhatsApp session marked connected");
    }

    /// Forget the current pairing (device unlinked or reauth in progress).
    pub fn mark_logged_out(&self) {
        let mut inner = self.write();
        let was = std::mem::replace(&mut inner.link, Link::Disconnected);
        drop(inner);
        if was != Link::Disconnected {
            info!("WhatsApp session marked logged out");
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.status_at(Utc::now())
    }

    /// Classify the stored state as seen at `now`. Never mutates anything.
    pub fn status_at(&self, now: DateTime<Utc>) -> AuthStatus {
        let inner = self.read();
        match &inner.link {
            Link::Connected { since } => AuthStatus::Connected { since: *since },
            Link::Pending {
                challenge,
                issued_at,
            } => {
                if now.signed_duration_since(*issued_at) < self.ttl {
                    AuthStatus::Pending {
                        challenge: challenge.clone(),
                        issued_at: *issued_at,
                    }
                } else {
                    AuthStatus::Expired {
                        issued_at: *issued_at,
                    }
                }
            }
            Link::Disconnected => AuthStatus::Disconnected,
        }
    }

    /// Ask the session owner for a fresh challenge. Returns immediately;
    /// requests made before the owner drains the flag coalesce into one.
    pub fn request_reauthentication(&self) {
        let already = {
            let mut inner = self.write();
            std::mem::replace(&mut inner.reauth_requested, true)
        };
        self.reauth.notify_one();
        if already {
            debug!("reauthentication already pending, request coalesced");
        } else {
            info!("reauthentication requested");
        }
    }

    pub fn reauth_pending(&self) -> bool {
        self.read().reauth_requested
    }

    /// Drain the reauthentication flag, returning whether one was pending.
    pub fn take_reauth_request(&self) -> bool {
        std::mem::take(&mut self.write().reauth_requested)
    }

    /// Resolve once a reauthentication request is pending, draining it.
    ///
    /// Cancel-safe: the flag is only drained on the poll that returns.
    pub async fn wait_for_reauth(&self) {
        loop {
            let notified = self.reauth.notified();
            if self.take_reauth_request() {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ConnectionRegister {
    fn default() -> Self {
        Self::new(DEFAULT_CHALLENGE_TTL)
    }
}
