//! Shutdown on SIGTERM/SIGINT (Ctrl+C outside Unix).
//!
//! The sync loop checks for shutdown between poll ticks, so the tick in
//! progress always completes.

use std::io;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info};

/// Shutdown trigger shared between the signal listener and the sync loop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Installs the signal handlers and spawns the listener task.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn listen(&self) -> io::Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
            }
            let _ = tx.send(true);
            debug!("signal listener stopped");
        });
        Ok(())
    }

    /// Spawns a Ctrl+C listener.
    #[cfg(not(unix))]
    pub fn listen(&self) -> io::Result<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("received Ctrl+C, shutting down");
                let _ = tx.send(true);
            }
        });
        Ok(())
    }

    /// Requests shutdown.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once shutdown has been requested.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
