use super::*;
use crate::auth::{AuthStatus, StatusTag};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Session whose event stream is fed by the test.
#[derive(Default)]
struct ScriptedSession {
    attempts: AtomicUsize,
    logouts: AtomicUsize,
    fail_first: AtomicUsize,
    current: std::sync::Mutex<Option<mpsc::Sender<SessionEvent>>>,
}

impl ScriptedSession {
    fn failing_first(n: usize) -> Self {
        let session = Self::default();
        session.fail_first.store(n, Ordering::SeqCst);
        session
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    fn sender(&self) -> mpsc::Sender<SessionEvent> {
        self.current
            .lock()
            .unwrap()
            .clone()
            .expect("no pairing attempt in progress")
    }

    /// Drop the current stream, as if the transport went away.
    fn end_stream(&self) {
        self.current.lock().unwrap().take();
    }
}

#[async_trait]
impl PairingSession for ScriptedSession {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn start_pairing(&self) -> Result<mpsc::Receiver<SessionEvent>> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            self.attempts.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("transport unavailable");
        }
        let (tx, rx) = mpsc::channel(8);
        *self.current.lock().unwrap() = Some(tx);
        // Counted last so a test that sees the new count also sees the new stream
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn logout(&self) -> Result<()> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn fast_options() -> OwnerOptions {
    OwnerOptions {
        print_qr: false,
        reconnect_base_secs: 0,
        reconnect_max_secs: 0,
    }
}

async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

async fn start_owner(
    session: &Arc<ScriptedSession>,
    register: &Arc<ConnectionRegister>,
) -> SessionOwner {
    let mut owner = SessionOwner::new(session.clone(), register.clone(), fast_options());
    owner.start().await.unwrap();
    eventually("first pairing attempt", || session.attempts() >= 1).await;
    owner
}

fn pending_challenge(register: &ConnectionRegister) -> Option<String> {
    match register.status() {
        AuthStatus::Pending { challenge, .. } => Some(challenge),
        _ => None,
    }
}

#[tokio::test]
async fn test_challenge_is_published() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;

    session
        .sender()
        .send(SessionEvent::Challenge("ABC123".into()))
        .await
        .unwrap();
    eventually("pending challenge", || {
        pending_challenge(&register).as_deref() == Some("ABC123")
    })
    .await;

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_rotating_challenges_supersede() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;

    let tx = session.sender();
    tx.send(SessionEvent::Challenge("A".into())).await.unwrap();
    tx.send(SessionEvent::Challenge("B".into())).await.unwrap();
    eventually("latest challenge", || {
        pending_challenge(&register).as_deref() == Some("B")
    })
    .await;

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_paired_marks_connected() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;

    let tx = session.sender();
    tx.send(SessionEvent::Challenge("A".into())).await.unwrap();
    tx.send(SessionEvent::Paired).await.unwrap();
    eventually("connected", || register.status().is_connected()).await;

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_reauth_restarts_pairing() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;

    session.sender().send(SessionEvent::Paired).await.unwrap();
    eventually("connected", || register.status().is_connected()).await;

    register.request_reauthentication();
    eventually("second attempt", || session.attempts() == 2).await;
    assert_eq!(session.logouts(), 1);
    assert!(!register.reauth_pending());
    assert_eq!(register.status().tag(), StatusTag::Disconnected);

    session
        .sender()
        .send(SessionEvent::Challenge("FRESH".into()))
        .await
        .unwrap();
    eventually("fresh challenge", || {
        pending_challenge(&register).as_deref() == Some("FRESH")
    })
    .await;

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_logged_out_clears_and_pairs_again() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;

    session.sender().send(SessionEvent::Paired).await.unwrap();
    eventually("connected", || register.status().is_connected()).await;

    session.sender().send(SessionEvent::LoggedOut).await.unwrap();
    eventually("second attempt", || session.attempts() == 2).await;
    assert_eq!(register.status(), AuthStatus::Disconnected);
    // Unlinked by the phone: nothing to log out locally
    assert_eq!(session.logouts(), 0);

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_stream_end_reconnects_and_keeps_connected() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;

    session.sender().send(SessionEvent::Paired).await.unwrap();
    eventually("connected", || register.status().is_connected()).await;

    session.end_stream();
    eventually("reconnect attempt", || session.attempts() == 2).await;
    assert!(register.status().is_connected());

    session
        .sender()
        .send(SessionEvent::Disconnected)
        .await
        .unwrap();
    eventually("third attempt", || session.attempts() == 3).await;
    assert!(register.status().is_connected());

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_failure_is_retried() {
    let session = Arc::new(ScriptedSession::failing_first(2));
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = SessionOwner::new(session.clone(), register.clone(), fast_options());
    owner.start().await.unwrap();

    eventually("third attempt succeeds", || session.attempts() == 3).await;
    session
        .sender()
        .send(SessionEvent::Challenge("OK".into()))
        .await
        .unwrap();
    eventually("pending challenge", || {
        pending_challenge(&register).as_deref() == Some("OK")
    })
    .await;

    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_reauth_cuts_backoff_short() {
    let session = Arc::new(ScriptedSession::failing_first(1));
    let register = Arc::new(ConnectionRegister::default());
    let slow = OwnerOptions {
        print_qr: false,
        reconnect_base_secs: 60,
        reconnect_max_secs: 60,
    };
    let mut owner = SessionOwner::new(session.clone(), register.clone(), slow);
    owner.start().await.unwrap();

    // First start fails, owner is now sleeping out a 60s backoff
    eventually("failed first attempt", || session.attempts() == 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(session.attempts(), 1);

    register.request_reauthentication();
    eventually("attempt after reauth", || session.attempts() == 2).await;
    assert_eq!(session.logouts(), 1);
    assert!(!register.reauth_pending());

    session
        .sender()
        .send(SessionEvent::Challenge("AFTER".into()))
        .await
        .unwrap();
    eventually("challenge after reauth", || {
        pending_challenge(&register).as_deref() == Some("AFTER")
    })
    .await;

    owner.stop().await.unwrap();
}

/// Session whose pairing call panics, taking the owner task down with it.
struct PanickingSession;

#[async_trait]
impl PairingSession for PanickingSession {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn start_pairing(&self) -> Result<mpsc::Receiver<SessionEvent>> {
        panic!("transport state corrupted");
    }

    async fn logout(&self) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_stop_reports_dead_owner() {
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = SessionOwner::new(Arc::new(PanickingSession), register, fast_options());
    owner.start().await.unwrap();
    eventually("owner task to die", || !owner.is_running()).await;

    let err = owner.stop().await.unwrap_err();
    assert!(matches!(err, BridgeError::Session(_)));
    assert!(err.to_string().contains("panicked"));
    assert!(!err.is_retryable());

    // Nothing left to stop
    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_halts_owner() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;
    assert!(owner.is_running());

    owner.stop().await.unwrap();
    assert!(!owner.is_running());

    let attempts = session.attempts();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(session.attempts(), attempts);
}

#[tokio::test]
async fn test_start_twice_is_noop() {
    let session = Arc::new(ScriptedSession::default());
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = start_owner(&session, &register).await;
    owner.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(session.attempts(), 1);
    owner.stop().await.unwrap();
}

#[tokio::test]
async fn test_simulated_session_end_to_end() {
    let session = Arc::new(SimulatedSession::new(Some(Duration::from_millis(200))));
    let register = Arc::new(ConnectionRegister::default());
    let mut owner = SessionOwner::new(session.clone(), register.clone(), fast_options());
    owner.start().await.unwrap();

    eventually("challenge", || pending_challenge(&register).is_some()).await;
    eventually("auto pairing", || register.status().is_connected()).await;

    register.request_reauthentication();
    eventually("new challenge after reauth", || {
        pending_challenge(&register).is_some()
    })
    .await;

    owner.stop().await.unwrap();
}

#[test]
fn test_owner_options_from_config() {
    let mut config = Config::default();
    config.auth.print_qr = false;
    config.session.reconnect_base_secs = 2;
    config.session.reconnect_max_secs = 30;
    let options = OwnerOptions::from(&config);
    assert!(!options.print_qr);
    assert_eq!(options.reconnect_base_secs, 2);
    assert_eq!(options.reconnect_max_secs, 30);
}
