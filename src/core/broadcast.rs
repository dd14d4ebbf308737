//! Status-change notifications for the observing UI layer.

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::{StatusChanged, SyncStatus};

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of `status-changed` notifications.
///
/// Sending never blocks and never fails the caller: with no subscribers the
/// notification is dropped, and slow subscribers observe a lag instead of
/// stalling the sync lane.
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    tx: broadcast::Sender<StatusChanged>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StatusBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to future notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.tx.subscribe()
    }

    /// Publish a notification
    pub fn emit(&self, event: StatusChanged) {
        trace!(id = %event.id, status = %event.status, "status-changed");
        let _ = self.tx.send(event);
    }

    /// Publish `status-changed(id, status, error?)`
    pub fn status_changed(&self, id: &str, status: SyncStatus, error: Option<&str>) {
        let mut event = StatusChanged::new(id, status);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.emit(event);
    }
}
