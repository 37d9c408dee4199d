//! Stop signal shared by the node's async tasks.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::signal;
use tokio::sync::broadcast;

pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    triggered: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            triggered: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Notify every subscriber. Returns false if the stop was already
    /// triggered, so callers can run their teardown once.
    pub fn trigger(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(());
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Resolve on SIGINT, SIGTERM or a programmatic [`trigger`](Self::trigger),
    /// whichever comes first. Signals do not trigger by themselves; the
    /// caller decides how to stop.
    pub async fn wait_for_signal(&self) {
        if self.is_triggered() {
            return;
        }
        let mut stopped = self.subscribe();

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "SIGTERM handler unavailable");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = terminate => tracing::info!("SIGTERM received"),
            _ = stopped.recv() => tracing::debug!("stop requested in process"),
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_is_notified() {
        let controller = ShutdownController::new();
        let mut first = controller.subscribe();
        let mut second = controller.subscribe();
        assert!(controller.trigger());
        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[test]
    fn second_trigger_is_a_no_op() {
        let controller = ShutdownController::new();
        assert!(controller.trigger());
        assert!(!controller.trigger());
        assert!(controller.is_triggered());
    }

    #[tokio::test]
    async fn wait_returns_after_trigger() {
        let controller = ShutdownController::new();
        controller.trigger();
        tokio::time::timeout(std::time::Duration::from_secs(1), controller.wait_for_signal())
            .await
            .unwrap();
    }
}
