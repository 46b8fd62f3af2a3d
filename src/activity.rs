//! Process-wide activity tracking and idle-driven shutdown.
//!
//! Exec sessions hold remote shells open on the cluster side, so an idle
//! sidecar must terminate itself rather than leak them. The monitor tracks
//! a single last-activity instant, advanced by the control-plane layer and
//! the drain tasks; a watchdog task compares it against the idle threshold
//! and escalates from graceful stop requests to forced termination.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::shutdown::ShutdownExecutor;

/// Idle-shutdown policy. Defaults mirror the upstream sidecar: 30 minutes
/// of inactivity, a 10 second retry period, three attempts.
#[derive(Debug, Clone)]
pub struct IdlePolicy {
    /// `None` disables idle shutdown entirely.
    pub idle_timeout: Option<Duration>,
    pub stop_retry_period: Duration,
    pub max_stop_attempts: u32,
}

impl Default for IdlePolicy {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            stop_retry_period: Duration::from_secs(10),
            max_stop_attempts: 3,
        }
    }
}

/// Tracks the most recent activity tick.
#[derive(Clone)]
pub struct ActivityMonitor {
    tx: Arc<watch::Sender<Instant>>,
}

impl ActivityMonitor {
    /// Create a monitor seeded with the current instant.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Instant::now());
        Self { tx: Arc::new(tx) }
    }

    /// Record activity. Cheap; safe from any task or thread.
    pub fn tick(&self) {
        self.tx.send_replace(Instant::now());
    }

    /// Time elapsed since the last tick.
    pub fn idle_for(&self) -> Duration {
        self.tx.borrow().elapsed()
    }

    /// Resolves once `threshold` has elapsed since the last tick. Every
    /// tick restarts the countdown.
    pub async fn wait_idle(&self, threshold: Duration) {
        let mut rx = self.tx.subscribe();
        loop {
            let last = *rx.borrow_and_update();
            let elapsed = last.elapsed();
            if elapsed >= threshold {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(threshold - elapsed) => {
                    // A tick may have landed while we slept; re-check.
                    if rx.borrow_and_update().elapsed() >= threshold {
                        return;
                    }
                }
                res = rx.changed() => {
                    if res.is_err() {
                        // All senders gone: nothing can ever tick again.
                        return;
                    }
                }
            }
        }
    }
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Run the idle watchdog until shutdown completes or escalation fires.
///
/// Once the idle threshold is crossed, `stop.request_stop()` is attempted
/// up to `max_stop_attempts` times, `stop_retry_period` apart. Activity
/// arriving after the first attempt does not abort the sequence: shutdown
/// is already in progress. If no attempt is acknowledged, `on_force` runs
/// (the binary passes `std::process::exit`).
pub async fn run_watchdog(
    monitor: ActivityMonitor,
    policy: IdlePolicy,
    stop: Arc<dyn ShutdownExecutor>,
    on_force: impl FnOnce() + Send + 'static,
) {
    let Some(threshold) = policy.idle_timeout else {
        tracing::info!("idle shutdown disabled");
        return;
    };

    monitor.wait_idle(threshold).await;
    tracing::info!(idle = ?threshold, "idle threshold exceeded, requesting shutdown");

    for attempt in 1..=policy.max_stop_attempts {
        if stop.request_stop().await {
            tracing::info!(attempt, "graceful shutdown acknowledged");
            return;
        }
        tracing::warn!(
            attempt,
            retry_in = ?policy.stop_retry_period,
            "stop request not acknowledged"
        );
        if attempt < policy.max_stop_attempts {
            tokio::time::sleep(policy.stop_retry_period).await;
        }
    }

    tracing::error!(
        attempts = policy.max_stop_attempts,
        "graceful shutdown failed, terminating forcefully"
    );
    on_force();
}
