//! Core synchronization logic.
//!
//! This module contains:
//! - Store: durable local recording store
//! - Retry: failure classification and backoff
//! - Upload: single-recording upload pipeline
//! - Reconciler: pending remote deletions
//! - Coordinator: the serialized task lane
//! - Connectivity: recovery scheduling
//! - Broadcast: status-change notifications

pub mod broadcast;
pub mod connectivity;
pub mod coordinator;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod upload;

use std::future::Future;
use std::time::Duration;

use crate::adapters::RemoteError;

// Re-export commonly used types
pub use broadcast::StatusBroadcaster;
pub use connectivity::{Connectivity, NativeMonitor, ProbeMonitor};
pub use coordinator::{
    ReconcileReport, SyncCoordinator, SyncHandle, SyncOptions, TaskOutcome, WorkerStopped,
};
pub use reconciler::{DeleteOutcome, DeleteReconciler, SweepReport};
pub use retry::{FailureClass, RetryDecision, RetryPolicy};
pub use store::{LocalStore, StoreError, StoreSummary};
pub use upload::{UploadOutcome, UploadPipeline};

/// Upper bounds for each kind of remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeouts {
    pub upload_target: Duration,
    pub object_transfer: Duration,
    pub metadata: Duration,
    pub delete: Duration,
    pub probe: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            upload_target: Duration::from_secs(15),
            object_transfer: Duration::from_secs(120),
            metadata: Duration::from_secs(15),
            delete: Duration::from_secs(15),
            probe: Duration::from_secs(5),
        }
    }
}

impl RequestTimeouts {
    /// Same limit for every call
    pub fn uniform(limit: Duration) -> Self {
        Self {
            upload_target: limit,
            object_transfer: limit,
            metadata: limit,
            delete: limit,
            probe: limit,
        }
    }
}

/// Run a remote call under a deadline; expiry counts as a network failure
pub(crate) async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Network(format!(
            "request timed out after {}ms",
            limit.as_millis()
        ))),
    }
}
