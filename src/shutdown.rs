//! Two-phase process shutdown: request, then wait for acknowledgement.
//!
//! Both phases are idempotent by contract. The idle watchdog requests a
//! stop through [`ShutdownExecutor`]; the server loop observes the request,
//! closes sessions and flushes buffers, then acknowledges. A request that
//! is never acknowledged is the watchdog's cue to escalate.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct ShutdownCoordinator {
    requested: CancellationToken,
    ack_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (ack_tx, _) = watch::channel(false);
        Self {
            requested: CancellationToken::new(),
            ack_tx: Arc::new(ack_tx),
        }
    }

    /// Ask the process to shut down. Idempotent.
    pub fn request(&self) {
        self.requested.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.is_cancelled()
    }

    /// Resolves when a shutdown has been requested.
    pub async fn wait_requested(&self) {
        self.requested.cancelled().await;
    }

    /// Mark the graceful phase complete. Idempotent.
    pub fn acknowledge(&self) {
        self.ack_tx.send_replace(true);
    }

    pub fn is_acknowledged(&self) -> bool {
        *self.ack_tx.borrow()
    }

    /// Wait up to `timeout` for the graceful phase to complete.
    pub async fn wait_acknowledged(&self, timeout: Duration) -> bool {
        if *self.ack_tx.borrow() {
            return true;
        }
        let mut rx = self.ack_tx.subscribe();
        tokio::time::timeout(timeout, async {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    return false;
                }
            }
            true
        })
        .await
        .unwrap_or(false)
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// The stop procedure invoked by the idle watchdog. Implementations need
/// not retry internally; the watchdog owns the retry policy.
#[async_trait::async_trait]
pub trait ShutdownExecutor: Send + Sync {
    /// Request a stop and report whether a clean shutdown completed.
    async fn request_stop(&self) -> bool;
}

/// [`ShutdownExecutor`] over a [`ShutdownCoordinator`]: requests the stop
/// and waits a bounded time for the server loop to acknowledge.
pub struct CoordinatorStop {
    pub coordinator: ShutdownCoordinator,
    pub ack_timeout: Duration,
}

#[async_trait::async_trait]
impl ShutdownExecutor for CoordinatorStop {
    async fn request_stop(&self) -> bool {
        self.coordinator.request();
        self.coordinator.wait_acknowledged(self.ack_timeout).await
    }
}
