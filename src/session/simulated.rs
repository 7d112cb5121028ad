//! Stand-in protocol session for local runs and tests.

use super::{PairingSession, SessionEvent};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Issues one synthetic challenge per pairing attempt and, when configured,
/// pairs itself after a delay. The pairing is remembered until `logout()`.
pub struct SimulatedSession {
    auto_pair_after: Option<Duration>,
    paired: Arc<AtomicBool>,
}

impl SimulatedSession {
    pub fn new(auto_pair_after: Option<Duration>) -> Self {
        Self {
            auto_pair_after,
            paired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_paired(&self) -> bool {
        self.paired.load(Ordering::SeqCst)
    }
}

/// Challenge in the shape WhatsApp Web uses: `2@ref,noise-key,identity-key`.
fn synthetic_challenge() -> String {
    format!(
        "2@{},{},{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[async_trait]
impl PairingSession for SimulatedSession {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn start_pairing(&self) -> Result<mpsc::Receiver<SessionEvent>> {
        let (tx, rx) = mpsc::channel(8);
        let paired = self.paired.clone();
        let auto_pair_after = self.auto_pair_after;

        tokio::spawn(async move {
            if paired.load(Ordering::SeqCst) {
                let _ = tx.send(SessionEvent::Paired).await;
            } else {
                if tx
                    .send(SessionEvent::Challenge(synthetic_challenge()))
                    .await
                    .is_err()
                {
                    return;
                }
                if let Some(delay) = auto_pair_after {
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {
                            paired.store(true, Ordering::SeqCst);
                            info!("simulated session paired");
                            let _ = tx.send(SessionEvent::Paired).await;
                        }
                        () = tx.closed() => return,
                    }
                }
            }
            // Keep the stream open until the owner lets go of it
            tx.closed().await;
        });

        Ok(rx)
    }

    async fn logout(&self) -> Result<()> {
        self.paired.store(false, Ordering::SeqCst);
        Ok(())
    }
}
