//! Upload pipeline for a single recording.
//!
//! Drives one recording through upload-target acquisition, object transfer,
//! metadata commit and local purge. Re-running it for the same id is safe:
//! a persisted `remote_key` marks the object transfer as done, and a
//! recording is purged only after both remote writes are confirmed.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::adapters::{MetadataStore, ObjectStore, RemoteError};
use crate::domain::{Recording, StatusPatch, SyncStatus};

use super::broadcast::StatusBroadcaster;
use super::retry::{RetryDecision, RetryPolicy};
use super::store::{LocalStore, StoreError};
use super::{bounded, RequestTimeouts};

/// Result of driving one recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Both remote writes confirmed; the local copy was purged
    Synced { key: Option<String> },

    /// Nothing to do, the recording was already synced
    AlreadySynced { key: Option<String> },

    /// The remote side was unreachable; the recording is back to `local`
    Offline { error: String },

    /// Terminal failure; the recording is `failed`
    Failed { error: String },

    /// No such recording in the local store
    NotFound,
}

impl UploadOutcome {
    /// Remote key of a recording this run purged
    pub fn purged_key(&self) -> Option<&str> {
        match self {
            Self::Synced { key } | Self::AlreadySynced { key } => key.as_deref(),
            _ => None,
        }
    }
}

/// Upload pipeline
pub struct UploadPipeline {
    store: Arc<LocalStore>,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    policy: RetryPolicy,
    timeouts: RequestTimeouts,
    broadcaster: StatusBroadcaster,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<LocalStore>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        policy: RetryPolicy,
        timeouts: RequestTimeouts,
        broadcaster: StatusBroadcaster,
    ) -> Self {
        Self {
            store,
            objects,
            metadata,
            policy,
            timeouts,
            broadcaster,
        }
    }

    /// Upload a recording by id.
    ///
    /// Only local store failures are returned as errors; every remote
    /// failure is classified and turned into an outcome.
    #[instrument(skip(self))]
    pub async fn run(&self, id: &str) -> Result<UploadOutcome, StoreError> {
        let mut record = match self.store.get_by_id(id)? {
            Some(record) => record,
            None => {
                debug!("Recording not in local store");
                return Ok(UploadOutcome::NotFound);
            }
        };

        if record.status == SyncStatus::Synced {
            self.store.delete(id)?;
            debug!("Recording already synced");
            return Ok(UploadOutcome::AlreadySynced {
                key: record.remote_key,
            });
        }

        if self.policy.is_exhausted(record.upload_attempts) {
            return self.exhausted(&record);
        }

        self.broadcaster
            .status_changed(id, SyncStatus::Uploading, None);

        let max_attempts = self.policy.max_attempts;
        let mut attempts = record.upload_attempts;
        let mut last_error = String::new();

        while attempts < max_attempts {
            let prior = attempts;
            attempts += 1;

            // Durable intent before any network call.
            self.store
                .update_status(id, SyncStatus::Uploading, StatusPatch::new().attempts(attempts))?;
            record.status = SyncStatus::Uploading;
            record.upload_attempts = attempts;

            debug!(attempt = attempts, has_key = record.remote_key.is_some(), "Upload attempt");

            let error = match self.attempt(&mut record).await? {
                Ok(()) => {
                    self.store.delete(id)?;
                    info!(attempt = attempts, "Recording synced");
                    self.broadcaster.status_changed(id, SyncStatus::Synced, None);
                    return Ok(UploadOutcome::Synced {
                        key: record.remote_key,
                    });
                }
                Err(e) => e,
            };
            last_error = error.to_string();

            match self.policy.decide(&error, attempts) {
                RetryDecision::Defer => {
                    self.store.update_status(
                        id,
                        SyncStatus::Local,
                        StatusPatch::new().attempts(prior).error(&last_error),
                    )?;
                    warn!(error = %last_error, "Remote unreachable, deferring upload");
                    self.broadcaster
                        .status_changed(id, SyncStatus::Local, Some(&last_error));
                    return Ok(UploadOutcome::Offline { error: last_error });
                }
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %last_error,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => break,
            }
        }

        self.fail(&record, last_error).await
    }

    /// One pass over the remote calls.
    ///
    /// The outer result carries local store failures, the inner one the
    /// remote failure to classify.
    async fn attempt(&self, record: &mut Recording) -> Result<Result<(), RemoteError>, StoreError> {
        if record.remote_key.is_none() {
            let target = match bounded(
                self.timeouts.upload_target,
                self.metadata.request_upload_target(&record.filename),
            )
            .await
            {
                Ok(target) => target,
                Err(e) => return Ok(Err(e)),
            };

            if let Err(e) = bounded(
                self.timeouts.object_transfer,
                self.objects.put_object(&target.url, &record.payload),
            )
            .await
            {
                return Ok(Err(e));
            }

            // Idempotency checkpoint: later attempts skip the transfer.
            self.store.update_status(
                &record.id,
                SyncStatus::Uploading,
                StatusPatch::new().remote_key(&target.key),
            )?;
            debug!(key = %target.key, "Object stored");
            record.remote_key = Some(target.key);
        }

        let metadata = record.metadata(SyncStatus::Synced, None);
        Ok(bounded(self.timeouts.metadata, self.metadata.commit_metadata(&metadata)).await)
    }

    /// Terminal failure: persist `failed` and mirror it remotely, best effort
    async fn fail(&self, record: &Recording, error: String) -> Result<UploadOutcome, StoreError> {
        let max_attempts = self.policy.max_attempts;
        self.store.update_status(
            &record.id,
            SyncStatus::Failed,
            StatusPatch::new().attempts(max_attempts).error(&error),
        )?;
        warn!(id = %record.id, error = %error, "Upload failed permanently");
        self.broadcaster
            .status_changed(&record.id, SyncStatus::Failed, Some(&error));

        let metadata = record.metadata(SyncStatus::Failed, Some(error.clone()));
        if let Err(e) = bounded(self.timeouts.metadata, self.metadata.commit_metadata(&metadata)).await {
            warn!(id = %record.id, error = %e, "Could not mirror failure to metadata store");
        }

        Ok(UploadOutcome::Failed { error })
    }

    /// Budget already spent: report failure without touching the network
    fn exhausted(&self, record: &Recording) -> Result<UploadOutcome, StoreError> {
        let error = record
            .last_error
            .clone()
            .unwrap_or_else(|| "retry budget exhausted".to_string());

        // An interrupted final attempt can leave the record in `uploading`.
        if record.status != SyncStatus::Failed {
            self.store.update_status(
                &record.id,
                SyncStatus::Failed,
                StatusPatch::new().error(&error),
            )?;
            self.broadcaster
                .status_changed(&record.id, SyncStatus::Failed, Some(&error));
        }

        debug!(attempts = record.upload_attempts, "Retry budget exhausted");
        Ok(UploadOutcome::Failed { error })
    }
}
