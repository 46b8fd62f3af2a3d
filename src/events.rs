//! Typed, direction-explicit lifecycle notifications.
//!
//! The core publishes exactly one event per session termination,
//! fire-and-forget; at-most-once delivery is acceptable and nothing here
//! retries.

use tokio::sync::broadcast;

/// A session termination observed by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Exited { id: u64 },
    Errored { id: u64, message: String },
}

/// Consumer of session termination events.
pub trait EventNotifier: Send + Sync {
    fn publish_exit(&self, id: u64);
    fn publish_error(&self, id: u64, message: &str);
}

/// Broadcast-channel-backed notifier. Sends are lossy when nobody is
/// subscribed, which is exactly the fire-and-forget contract.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<ExecEvent>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChannelNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventNotifier for ChannelNotifier {
    fn publish_exit(&self, id: u64) {
        let _ = self.tx.send(ExecEvent::Exited { id });
    }

    fn publish_error(&self, id: u64, message: &str) {
        let _ = self.tx.send(ExecEvent::Errored {
            id,
            message: message.to_string(),
        });
    }
}

/// Notifier that discards everything. For tests and minimal deployments.
pub struct NullNotifier;

impl EventNotifier for NullNotifier {
    fn publish_exit(&self, _id: u64) {}
    fn publish_error(&self, _id: u64, _message: &str) {}
}
