use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Coordinates graceful shutdown of the sweeper and event handlers of one upload session
///
/// Usage:
/// ```no_run
/// use upload_core::shutdown::ShutdownCoordinator;
/// use std::time::Duration;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
///
/// // In background loops:
/// let mut shutdown_rx = coordinator.subscribe();
/// let mut ticker = tokio::time::interval(Duration::from_secs(1));
/// loop {
///     tokio::select! {
///         _ = ticker.tick() => { /* housekeeping */ }
///         _ = shutdown_rx.recv() => break,
///     }
/// }
///
/// // At session end:
/// coordinator.shutdown();
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(10);
        Self {
            shutdown_tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to shutdown signals
    ///
    /// Loops started after shutdown should check [`Self::is_shutdown`] first,
    /// the signal is not replayed to late subscribers.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Trigger graceful shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn has_subscribers(&self) -> bool {
        self.shutdown_tx.receiver_count() > 0
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
