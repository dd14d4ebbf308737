//! Sync coordinator: the single serialized task lane.
//!
//! Every upload, delete and sweep, whatever its origin, is appended to one
//! queue and executed strictly one at a time by one worker. A failing task
//! is logged and the next one runs. Because a delete for an id queues
//! behind an in-flight upload of the same id, the two never race.
//!
//! The coordinator holds no durable state of its own: on every activation
//! it rebuilds pending work from the local store.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{MetadataStore, ObjectStore};
use crate::domain::{StatusChanged, SyncMessage, SyncStatus};

use super::broadcast::StatusBroadcaster;
use super::connectivity::Connectivity;
use super::reconciler::{DeleteOutcome, DeleteReconciler, SweepReport};
use super::retry::RetryPolicy;
use super::store::{LocalStore, StoreError};
use super::upload::{UploadOutcome, UploadPipeline};
use super::RequestTimeouts;

/// The sync worker is no longer accepting tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sync worker has stopped")]
pub struct WorkerStopped;

/// Queue entry
#[derive(Debug)]
pub(crate) enum Task {
    Message(SyncMessage),
    Barrier(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable submission side of the task lane
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Task>,
}

impl SyncHandle {
    pub(crate) fn pair(capacity: usize) -> (Self, mpsc::Receiver<Task>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Append a message to the lane
    pub async fn submit(&self, message: SyncMessage) -> Result<(), WorkerStopped> {
        self.tx
            .send(Task::Message(message))
            .await
            .map_err(|_| WorkerStopped)
    }

    /// Resolve once every task submitted before this call has finished
    pub async fn flush(&self) -> Result<(), WorkerStopped> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Task::Barrier(done_tx))
            .await
            .map_err(|_| WorkerStopped)?;
        done_rx.await.map_err(|_| WorkerStopped)
    }

    /// Stop the worker after the tasks already queued
    pub async fn shutdown(&self) -> Result<(), WorkerStopped> {
        self.tx.send(Task::Shutdown).await.map_err(|_| WorkerStopped)
    }

    /// Whether the worker has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Tunables for the coordinator and the components it owns
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub policy: RetryPolicy,
    pub timeouts: RequestTimeouts,
    pub queue_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            timeouts: RequestTimeouts::default(),
            queue_capacity: 256,
            broadcast_capacity: 256,
        }
    }
}

/// Tally of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub deletes: SweepReport,
    pub synced: usize,
    pub deferred: usize,
    pub failed: usize,
    /// Work left over after the sweep (recovery was scheduled)
    pub unresolved: bool,
}

/// What a task did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Upload(UploadOutcome),
    Delete(DeleteOutcome),
    Reconcile(ReconcileReport),
}

/// How many purged remote keys the lane remembers
const PURGED_KEYS: usize = 1024;

/// Owner of the task lane
pub struct SyncCoordinator {
    store: Arc<LocalStore>,
    pipeline: UploadPipeline,
    reconciler: DeleteReconciler,
    connectivity: Arc<dyn Connectivity>,
    broadcaster: StatusBroadcaster,
    handle: SyncHandle,
    rx: mpsc::Receiver<Task>,
    /// Remote keys of recordings purged after syncing, oldest first.
    /// A delete queued behind the upload still needs the key.
    purged: Mutex<VecDeque<(String, String)>>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalStore>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        connectivity: Arc<dyn Connectivity>,
        options: SyncOptions,
    ) -> Self {
        let broadcaster = StatusBroadcaster::new(options.broadcast_capacity);
        let (handle, rx) = SyncHandle::pair(options.queue_capacity);

        let pipeline = UploadPipeline::new(
            Arc::clone(&store),
            objects,
            Arc::clone(&metadata),
            options.policy,
            options.timeouts,
            broadcaster.clone(),
        );
        let reconciler = DeleteReconciler::new(Arc::clone(&store), metadata, options.timeouts.delete);

        Self {
            store,
            pipeline,
            reconciler,
            connectivity,
            broadcaster,
            handle,
            rx,
            purged: Mutex::new(VecDeque::new()),
        }
    }

    /// Submission handle for this lane
    pub fn handle(&self) -> SyncHandle {
        self.handle.clone()
    }

    /// Subscribe to `status-changed` notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.broadcaster.subscribe()
    }

    /// Start the worker on the current runtime
    pub fn spawn(self) -> (SyncHandle, JoinHandle<()>) {
        let handle = self.handle();
        let join = tokio::spawn(self.run());
        (handle, join)
    }

    /// Worker loop: activation sweep, then drain the queue until shutdown
    pub async fn run(mut self) {
        info!("Sync worker activated");
        self.run_task(SyncMessage::RetryAll).await;

        while let Some(task) = self.rx.recv().await {
            match task {
                Task::Message(message) => self.run_task(message).await,
                Task::Barrier(done) => {
                    let _ = done.send(());
                }
                Task::Shutdown => break,
            }
        }

        info!("Sync worker stopped");
    }

    async fn run_task(&self, message: SyncMessage) {
        debug!(?message, "Running task");
        match self.execute(message.clone()).await {
            Ok(outcome) => debug!(?outcome, "Task finished"),
            Err(e) => warn!(?message, error = %e, "Task failed"),
        }
    }

    /// Execute one message directly, outside the queue
    pub async fn execute(&self, message: SyncMessage) -> Result<TaskOutcome, StoreError> {
        match message {
            SyncMessage::Upload { id } => self.upload(&id).await,
            SyncMessage::Retry { id } => {
                if self.store.reset_for_retry(&id)? {
                    info!(%id, "Recording reset for manual retry");
                    self.broadcaster.status_changed(&id, SyncStatus::Local, None);
                }
                self.upload(&id).await
            }
            SyncMessage::Delete { id, key } => {
                let key = match key {
                    Some(key) => Some(key),
                    None => self.take_purged(&id)?,
                };
                let outcome = self
                    .reconciler
                    .request(&id, key, self.connectivity.is_online())
                    .await?;
                if outcome == DeleteOutcome::Deferred {
                    self.connectivity.schedule_recovery(self.handle());
                }
                Ok(TaskOutcome::Delete(outcome))
            }
            SyncMessage::RetryAll => Ok(TaskOutcome::Reconcile(self.reconcile().await?)),
        }
    }

    async fn upload(&self, id: &str) -> Result<TaskOutcome, StoreError> {
        let outcome = self.pipeline.run(id).await?;
        self.note_upload(id, &outcome)?;
        Ok(TaskOutcome::Upload(outcome))
    }

    fn note_upload(&self, id: &str, outcome: &UploadOutcome) -> Result<(), StoreError> {
        self.remember_purged(id, outcome)?;
        match outcome {
            UploadOutcome::Synced { .. } => self.connectivity.report_reachable(),
            UploadOutcome::Offline { .. } => {
                self.connectivity.report_unreachable();
                self.connectivity.schedule_recovery(self.handle());
            }
            _ => {}
        }
        Ok(())
    }

    fn remember_purged(&self, id: &str, outcome: &UploadOutcome) -> Result<(), StoreError> {
        let Some(key) = outcome.purged_key() else {
            return Ok(());
        };
        let mut purged = self.purged.lock().map_err(|_| StoreError::Poisoned)?;
        purged.retain(|(purged_id, _)| purged_id != id);
        if purged.len() >= PURGED_KEYS {
            purged.pop_front();
        }
        purged.push_back((id.to_string(), key.to_string()));
        Ok(())
    }

    fn take_purged(&self, id: &str) -> Result<Option<String>, StoreError> {
        let mut purged = self.purged.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(idx) = purged.iter().position(|(purged_id, _)| purged_id == id) else {
            return Ok(None);
        };
        Ok(purged.remove(idx).map(|(_, key)| key))
    }

    /// Full reconciliation sweep: pending deletes first, then every
    /// `local` or `uploading` recording. `failed` ones wait for a manual
    /// retry.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let mut report = ReconcileReport {
            deletes: self.reconciler.sweep().await?,
            ..Default::default()
        };

        let ids = self
            .store
            .ids_by_status(&[SyncStatus::Local, SyncStatus::Uploading])?;

        for id in &ids {
            let outcome = self.pipeline.run(id).await?;
            self.remember_purged(id, &outcome)?;
            match outcome {
                UploadOutcome::Synced { .. } | UploadOutcome::AlreadySynced { .. } => {
                    report.synced += 1
                }
                UploadOutcome::Failed { .. } => report.failed += 1,
                UploadOutcome::NotFound => {}
                UploadOutcome::Offline { .. } => {
                    report.deferred += 1;
                    self.connectivity.report_unreachable();
                }
            }
        }

        let summary = self.store.summary()?;
        report.unresolved = summary.has_unresolved_work();

        info!(
            candidates = ids.len(),
            synced = report.synced,
            failed = report.failed,
            deferred = report.deferred,
            pending_deletes = summary.pending_deletes,
            "Reconciliation sweep finished"
        );

        if report.unresolved {
            self.connectivity.schedule_recovery(self.handle());
        }

        Ok(report)
    }
}
