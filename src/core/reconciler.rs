//! Pending remote deletions.
//!
//! A delete is made durable as a `PendingDelete` before any network call,
//! and that entry is removed only once the remote side confirms. Entries
//! outlive the recordings they reference.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::adapters::MetadataStore;
use crate::domain::PendingDelete;

use super::store::{LocalStore, StoreError};

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The recording never reached the remote side; removed locally only
    LocalOnly,

    /// Remote deletion confirmed
    Deleted,

    /// Remote deletion pending; will be retried by a sweep
    Deferred,
}

/// Tally of one reconciliation sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub confirmed: usize,
    pub remaining: usize,
}

/// Drives pending deletions to completion
pub struct DeleteReconciler {
    store: Arc<LocalStore>,
    metadata: Arc<dyn MetadataStore>,
    timeout: Duration,
}

impl DeleteReconciler {
    pub fn new(store: Arc<LocalStore>, metadata: Arc<dyn MetadataStore>, timeout: Duration) -> Self {
        Self {
            store,
            metadata,
            timeout,
        }
    }

    /// Delete a recording locally and, when it may exist remotely, remotely.
    ///
    /// `key` overrides the locally known remote key (synced recordings are
    /// no longer in the local store). The remote call is only attempted
    /// when `online`; otherwise the delete stays pending.
    #[instrument(skip(self, key))]
    pub async fn request(
        &self,
        id: &str,
        key: Option<String>,
        online: bool,
    ) -> Result<DeleteOutcome, StoreError> {
        let record = self.store.get_by_id(id)?;
        let key = key.or_else(|| record.as_ref().and_then(|r| r.remote_key.clone()));

        if let Some(record) = &record {
            if key.is_none() && !record.touched_remote() {
                self.store.delete(id)?;
                info!("Deleted local-only recording");
                return Ok(DeleteOutcome::LocalOnly);
            }
        }

        let entry = PendingDelete::new(id, key);
        self.store.stage_delete(&entry)?;

        if !online {
            info!("Offline, remote delete deferred");
            return Ok(DeleteOutcome::Deferred);
        }

        if self.try_delete(&entry).await? {
            info!("Remote delete confirmed");
            Ok(DeleteOutcome::Deleted)
        } else {
            Ok(DeleteOutcome::Deferred)
        }
    }

    /// Attempt every pending delete independently
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let pending = self.store.list_pending_deletes()?;
        let mut report = SweepReport::default();

        for entry in &pending {
            report.attempted += 1;
            if self.try_delete(entry).await? {
                report.confirmed += 1;
            } else {
                report.remaining += 1;
            }
        }

        if report.attempted > 0 {
            info!(
                attempted = report.attempted,
                confirmed = report.confirmed,
                remaining = report.remaining,
                "Pending delete sweep finished"
            );
        }
        Ok(report)
    }

    /// One remote delete; clears the entry only on confirmation
    async fn try_delete(&self, entry: &PendingDelete) -> Result<bool, StoreError> {
        let call = self
            .metadata
            .delete_remote(entry.remote_key.as_deref(), &entry.id);

        let confirmed = match tokio::time::timeout(self.timeout, call).await {
            Ok(confirmed) => confirmed,
            Err(_) => {
                warn!(id = %entry.id, "Remote delete timed out");
                false
            }
        };

        if confirmed {
            self.store.remove_pending_delete(&entry.id)?;
        } else {
            debug!(id = %entry.id, "Remote delete not confirmed, keeping pending entry");
        }
        Ok(confirmed)
    }
}
