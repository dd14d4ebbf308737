//! Remote capability interfaces.
//!
//! The remote store is two independently failing capabilities: an object
//! store for audio bytes and a metadata store for descriptive records.
//! Both are consumed through traits so the sync core never depends on a
//! transport.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Payload, RecordingMetadata, UploadTarget};

pub use http::{HttpMetadataStore, HttpObjectStore, HttpProbe};

/// Failure of a remote call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Transport unreachable, or aborted by our own timeout
    #[error("Network error: {0}")]
    Network(String),

    /// The remote answered with a failure status
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },
}

/// Content storage addressed by key
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Transfer the payload to a pre-authorized upload target
    async fn put_object(&self, url: &str, payload: &Payload) -> Result<(), RemoteError>;
}

/// Structured record storage for descriptive fields and sync status
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Ask for a URL and key to upload `filename` to
    async fn request_upload_target(&self, filename: &str) -> Result<UploadTarget, RemoteError>;

    /// Upsert the metadata record
    async fn commit_metadata(&self, metadata: &RecordingMetadata) -> Result<(), RemoteError>;

    /// Remove the object and its metadata entry.
    ///
    /// Returns true once the remote side no longer holds either, including
    /// when they were already absent. Never raises.
    async fn delete_remote(&self, key: Option<&str>, id: &str) -> bool;

    /// Records the remote side considers synced
    async fn list_synced(&self) -> Result<Vec<RecordingMetadata>, RemoteError>;
}

/// Lightweight reachability check
#[async_trait]
pub trait Reachability: Send + Sync {
    /// True if the remote side answered at all
    async fn probe(&self) -> bool;
}
