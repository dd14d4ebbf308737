//! Domain types for the sync engine.
//!
//! This module contains the core data structures:
//! - Recording: captured audio and its sync status
//! - PendingDelete: remote deletions still owed
//! - Messages: requests from and notifications to the UI layer

pub mod messages;
pub mod recording;

// Re-export commonly used types
pub use messages::{StatusChanged, SyncMessage};
pub use recording::{
    Payload, PendingDelete, Recording, RecordingMetadata, StatusPatch, SyncStatus, UploadTarget,
};
