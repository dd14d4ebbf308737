//! Delete Reconciler Integration Tests
//!
//! Pending deletes must survive until the remote side confirms them.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use voxsync::core::{DeleteOutcome, DeleteReconciler, LocalStore};
use voxsync::domain::SyncStatus;

fn reconciler(store: &Arc<LocalStore>, metadata: &Arc<FakeMetadataStore>, timeout: Duration) -> DeleteReconciler {
    DeleteReconciler::new(Arc::clone(store), metadata.clone(), timeout)
}

#[tokio::test]
async fn test_offline_delete_persists_until_sweep_confirms() {
    let store = memory_store();
    let metadata = Arc::new(FakeMetadataStore::new(new_log()).then_delete(false));
    let reconciler = reconciler(&store, &metadata, Duration::from_secs(5));

    let mut record = recording("r3");
    record.remote_key = Some("recordings/r3.m4a".to_string());
    record.upload_attempts = 1;
    store.put(&record).unwrap();

    let outcome = reconciler.request("r3", None, false).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deferred);
    assert!(store.get_by_id("r3").unwrap().is_none());
    assert!(metadata.deletes_for("r3").is_empty());

    let pending = store.list_pending_deletes().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].remote_key.as_deref(), Some("recordings/r3.m4a"));

    // Remote refuses the first time: the entry stays.
    let report = reconciler.sweep().await.unwrap();
    assert_eq!((report.attempted, report.confirmed, report.remaining), (1, 0, 1));
    assert_eq!(store.list_pending_deletes().unwrap().len(), 1);

    // Confirmed on the next sweep: the entry goes.
    let report = reconciler.sweep().await.unwrap();
    assert_eq!((report.attempted, report.confirmed, report.remaining), (1, 1, 0));
    assert!(store.list_pending_deletes().unwrap().is_empty());

    assert_eq!(
        metadata.deletes_for("r3"),
        vec![Some("recordings/r3.m4a".to_string()); 2]
    );
}

#[tokio::test]
async fn test_never_uploaded_recording_is_deleted_locally_only() {
    let store = memory_store();
    let metadata = Arc::new(FakeMetadataStore::new(new_log()));
    let reconciler = reconciler(&store, &metadata, Duration::from_secs(5));

    store.put(&recording("draft")).unwrap();

    let outcome = reconciler.request("draft", None, true).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::LocalOnly);
    assert!(store.get_by_id("draft").unwrap().is_none());
    assert!(store.list_pending_deletes().unwrap().is_empty());
    assert!(metadata.deletes_for("draft").is_empty());
}

#[tokio::test]
async fn test_failed_recording_without_key_still_deletes_remotely() {
    let store = memory_store();
    let metadata = Arc::new(FakeMetadataStore::new(new_log()));
    let reconciler = reconciler(&store, &metadata, Duration::from_secs(5));

    // The failure mirror may have created a metadata entry.
    let mut record = recording("bad");
    record.status = SyncStatus::Failed;
    record.upload_attempts = 3;
    store.put(&record).unwrap();

    let outcome = reconciler.request("bad", None, true).await.unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert_eq!(metadata.deletes_for("bad"), vec![None]);
    assert!(store.list_pending_deletes().unwrap().is_empty());
}

#[tokio::test]
async fn test_message_key_is_used_for_synced_recordings() {
    let store = memory_store();
    let metadata = Arc::new(FakeMetadataStore::new(new_log()));
    let reconciler = reconciler(&store, &metadata, Duration::from_secs(5));

    let outcome = reconciler
        .request("synced-earlier", Some("recordings/s.m4a".to_string()), true)
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Deleted);
    assert_eq!(
        metadata.deletes_for("synced-earlier"),
        vec![Some("recordings/s.m4a".to_string())]
    );
}

#[tokio::test]
async fn test_sweep_attempts_every_entry_independently() {
    let store = memory_store();
    let metadata = Arc::new(
        FakeMetadataStore::new(new_log())
            .then_delete(false)
            .then_delete(true)
            .then_delete(false),
    );
    let reconciler = reconciler(&store, &metadata, Duration::from_secs(5));

    for id in ["d1", "d2", "d3"] {
        reconciler
            .request(id, Some(format!("recordings/{}.m4a", id)), false)
            .await
            .unwrap();
    }

    let report = reconciler.sweep().await.unwrap();

    assert_eq!(report.attempted, 3);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.remaining, 2);
    assert_eq!(store.list_pending_deletes().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_delete_stays_pending() {
    let store = memory_store();
    let metadata = Arc::new(FakeMetadataStore::new(new_log()).with_delay(Duration::from_secs(60)));
    let reconciler = reconciler(&store, &metadata, Duration::from_millis(100));

    let outcome = reconciler
        .request("slow", Some("recordings/slow.m4a".to_string()), true)
        .await
        .unwrap();

    assert_eq!(outcome, DeleteOutcome::Deferred);
    assert_eq!(store.list_pending_deletes().unwrap().len(), 1);
}

#[tokio::test]
async fn test_pending_deletes_survive_reopen() {
    let temp = tempfile::TempDir::new().unwrap();
    let path = temp.path().join("voxsync.db");

    {
        let store = Arc::new(LocalStore::open(&path).unwrap());
        let metadata = Arc::new(FakeMetadataStore::new(new_log()));
        let reconciler = reconciler(&store, &metadata, Duration::from_secs(5));
        reconciler
            .request("kept", Some("recordings/kept.m4a".to_string()), false)
            .await
            .unwrap();
    }

    let store = LocalStore::open(&path).unwrap();
    let pending = store.list_pending_deletes().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "kept");
}
