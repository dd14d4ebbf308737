//! Shared test doubles for the remote capabilities.
//!
//! Each fake plays back a script of responses and records every call into
//! a shared log so tests can assert on call order across capabilities.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use voxsync::adapters::{MetadataStore, ObjectStore, RemoteError};
use voxsync::core::{Connectivity, LocalStore, RetryPolicy, SyncHandle};
use voxsync::domain::{Payload, Recording, RecordingMetadata, StatusChanged, SyncStatus, UploadTarget};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn server(status: u16) -> RemoteError {
    RemoteError::Server {
        status,
        message: format!("HTTP {}", status),
    }
}

pub fn network() -> RemoteError {
    RemoteError::Network("connection refused".to_string())
}

/// Millisecond backoff so retries do not slow the suite down
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        ..RetryPolicy::default()
    }
}

pub fn recording(id: &str) -> Recording {
    Recording::capture(
        format!("{}.m4a", id),
        Payload::new(vec![0u8; 64], "audio/mp4"),
        12.5,
    )
    .with_id(id)
}

/// Object store that replays scripted results, then succeeds
#[derive(Default)]
pub struct FakeObjectStore {
    script: Mutex<VecDeque<Result<(), RemoteError>>>,
    pub puts: AtomicUsize,
    log: Option<CallLog>,
}

impl FakeObjectStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn then(self, result: Result<(), RemoteError>) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put_object(&self, url: &str, _payload: &Payload) -> Result<(), RemoteError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(format!("put:{}", url));
        }
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Metadata store with independent scripts per operation
#[derive(Default)]
pub struct FakeMetadataStore {
    targets: Mutex<VecDeque<Result<UploadTarget, RemoteError>>>,
    commits: Mutex<VecDeque<Result<(), RemoteError>>>,
    deletes: Mutex<VecDeque<bool>>,
    pub committed: Mutex<Vec<RecordingMetadata>>,
    pub delete_calls: Mutex<Vec<(Option<String>, String)>>,
    pub target_calls: AtomicUsize,
    /// Applied to every call, for timeout tests
    pub delay: Option<Duration>,
    log: Option<CallLog>,
}

impl FakeMetadataStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log: Some(log),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn then_target(self, result: Result<UploadTarget, RemoteError>) -> Self {
        self.targets.lock().unwrap().push_back(result);
        self
    }

    pub fn then_commit(self, result: Result<(), RemoteError>) -> Self {
        self.commits.lock().unwrap().push_back(result);
        self
    }

    pub fn then_delete(self, confirmed: bool) -> Self {
        self.deletes.lock().unwrap().push_back(confirmed);
        self
    }

    pub fn commit_count(&self) -> usize {
        self.committed.lock().unwrap().len()
    }

    pub fn last_commit(&self) -> Option<RecordingMetadata> {
        self.committed.lock().unwrap().last().cloned()
    }

    pub fn deletes_for(&self, id: &str) -> Vec<Option<String>> {
        self.delete_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, call_id)| call_id == id)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn record(&self, entry: String) {
        if let Some(log) = &self.log {
            log.lock().unwrap().push(entry);
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn request_upload_target(&self, filename: &str) -> Result<UploadTarget, RemoteError> {
        self.pause().await;
        let n = self.target_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("target:{}", filename));
        self.targets.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(UploadTarget {
                url: format!("https://objects.test/upload/{}", n),
                key: format!("recordings/{}", filename),
            })
        })
    }

    async fn commit_metadata(&self, metadata: &RecordingMetadata) -> Result<(), RemoteError> {
        self.pause().await;
        self.record(format!("commit:{}:{}", metadata.id, metadata.status));
        self.committed.lock().unwrap().push(metadata.clone());
        self.commits.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn delete_remote(&self, key: Option<&str>, id: &str) -> bool {
        self.pause().await;
        self.record(format!("delete:{}", id));
        self.delete_calls
            .lock()
            .unwrap()
            .push((key.map(str::to_string), id.to_string()));
        self.deletes.lock().unwrap().pop_front().unwrap_or(true)
    }

    async fn list_synced(&self) -> Result<Vec<RecordingMetadata>, RemoteError> {
        Ok(self
            .committed
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.status == SyncStatus::Synced)
            .cloned()
            .collect())
    }
}

/// Connectivity double that only counts recovery requests
pub struct SpyConnectivity {
    pub online: AtomicBool,
    pub scheduled: AtomicUsize,
    pub unreachable_reports: AtomicUsize,
}

impl SpyConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            scheduled: AtomicUsize::new(0),
            unreachable_reports: AtomicUsize::new(0),
        }
    }

    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }
}

impl Connectivity for SpyConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn report_unreachable(&self) {
        self.unreachable_reports.fetch_add(1, Ordering::SeqCst);
        self.online.store(false, Ordering::SeqCst);
    }

    fn report_reachable(&self) {
        self.online.store(true, Ordering::SeqCst);
    }

    fn schedule_recovery(&self, _handle: SyncHandle) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn memory_store() -> Arc<LocalStore> {
    Arc::new(LocalStore::open_in_memory().unwrap())
}

/// Everything broadcast so far, without waiting
pub fn drain_events(rx: &mut broadcast::Receiver<StatusChanged>) -> Vec<(String, SyncStatus, Option<String>)> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push((event.id, event.status, event.error));
    }
    events
}

pub fn statuses_for(events: &[(String, SyncStatus, Option<String>)], id: &str) -> Vec<SyncStatus> {
    events
        .iter()
        .filter(|(event_id, _, _)| event_id == id)
        .map(|(_, status, _)| *status)
        .collect()
}
