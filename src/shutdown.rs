//! Shutdown Controller: one `tokio::sync::watch` channel fans a single
//! SIGINT/SIGTERM out to the Worker Pool, the background controllers, and
//! the Axum server, each of which stops accepting new work and drains
//! on its own schedule.

use tokio::sync::watch;

pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Flips the shared signal to `true`; every subscriber's next
    /// `changed()`/`borrow()` observes it.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// Resolves once a SIGINT (Ctrl-C) or, on Unix, a SIGTERM arrives.
    pub async fn wait_for_signal() {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install SIGINT handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
