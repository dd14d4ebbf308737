//! voxsync - Offline-first audio recording sync engine
//!
//! Captured recordings live in a durable local store until both the
//! object store and the metadata store confirm them, then the local copy
//! is purged. Connectivity loss is normal operation: work is deferred and
//! resumed by a reconciliation sweep.
//!
//! # Architecture
//!
//! - All sync work runs through one serialized task lane
//! - The lane keeps no state of its own; every activation rebuilds
//!   pending work from the local store
//! - Deletes are made durable before any network call
//!
//! # Modules
//!
//! - `adapters`: Remote capabilities (object store, metadata store, reachability)
//! - `core`: Sync logic (LocalStore, UploadPipeline, DeleteReconciler, SyncCoordinator)
//! - `domain`: Data structures (Recording, PendingDelete, messages)
//! - `config`: Configuration discovery
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Capture and upload a file
//! voxsync import memo.m4a --duration 42
//!
//! # Keep syncing until Ctrl+C
//! voxsync run
//!
//! # Retry a failed upload
//! voxsync retry <id>
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{MetadataStore, ObjectStore, Reachability, RemoteError};
pub use core::{LocalStore, StoreError, SyncCoordinator, SyncHandle, SyncOptions};
pub use domain::{PendingDelete, Recording, StatusChanged, SyncMessage, SyncStatus};
