//! Recording state and the status state machine.
//!
//! A Recording is a captured audio unit that lives in the local store until
//! both the object store and the metadata store have confirmed it.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw audio bytes plus their content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Encoded audio; clones share the buffer
    pub bytes: Bytes,

    /// MIME type, e.g. `audio/webm`
    pub content_type: String,
}

impl Payload {
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A captured audio unit awaiting (or undergoing) synchronization
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// Opaque identifier assigned at capture time
    pub id: String,

    /// Audio content
    pub payload: Payload,

    /// Original file name
    pub filename: String,

    /// Size of the payload in bytes
    pub file_size: u64,

    /// Duration in seconds
    pub duration_secs: f64,

    /// When the audio was captured
    pub recorded_at: DateTime<Utc>,

    /// Current sync status
    pub status: SyncStatus,

    /// Object-store key, present once the object PUT has succeeded
    pub remote_key: Option<String>,

    /// Upload attempts since the last user-initiated reset
    pub upload_attempts: u32,

    /// Last failure message
    pub last_error: Option<String>,
}

impl Recording {
    /// Create a freshly captured recording in `local` status
    pub fn capture(filename: impl Into<String>, payload: Payload, duration_secs: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_size: payload.len() as u64,
            payload,
            filename: filename.into(),
            duration_secs,
            recorded_at: Utc::now(),
            status: SyncStatus::Local,
            remote_key: None,
            upload_attempts: 0,
            last_error: None,
        }
    }

    /// Override the generated identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Whether any part of this recording may exist remotely
    pub fn touched_remote(&self) -> bool {
        self.remote_key.is_some() || self.upload_attempts > 0 || self.status == SyncStatus::Failed
    }

    /// Metadata document describing this recording in the given status
    pub fn metadata(&self, status: SyncStatus, error: Option<String>) -> RecordingMetadata {
        RecordingMetadata {
            id: self.id.clone(),
            filename: self.filename.clone(),
            key: self.remote_key.clone(),
            size: self.file_size,
            duration: self.duration_secs,
            recorded_at: self.recorded_at,
            status,
            error,
        }
    }
}

/// Sync status of a recording
///
/// ```text
/// local ──► uploading ──► synced (purged)
///   ▲           │
///   └───────────┤ network failure
///               ▼
///            failed ──► local (manual retry only)
/// ```
///
/// A `local` recording whose retry budget is already spent goes straight
/// to `failed` without another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Stored on-device only
    Local,

    /// An upload attempt is in flight (or was interrupted)
    Uploading,

    /// Confirmed by both remote stores
    Synced,

    /// Permanently rejected or retry budget exhausted
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Uploading => "uploading",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        matches!(
            (self, next),
            (Local, Uploading)
                | (Local, Failed)
                | (Failed, Uploading)
                | (Uploading, Uploading)
                | (Uploading, Synced)
                | (Uploading, Local)
                | (Uploading, Failed)
                | (Failed, Local)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "uploading" => Ok(Self::Uploading),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown sync status: {}", other)),
        }
    }
}

/// Partial update applied together with a status change.
///
/// Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusPatch {
    pub upload_attempts: Option<u32>,
    pub remote_key: Option<String>,
    pub error: Option<String>,
}

impl StatusPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.upload_attempts = Some(attempts);
        self
    }

    pub fn remote_key(mut self, key: impl Into<String>) -> Self {
        self.remote_key = Some(key.into());
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A remote deletion that still has to happen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelete {
    /// Recording id
    pub id: String,

    /// Object-store key, if one was ever assigned
    pub remote_key: Option<String>,

    /// When the user asked for the deletion
    pub requested_at: DateTime<Utc>,
}

impl PendingDelete {
    pub fn new(id: impl Into<String>, remote_key: Option<String>) -> Self {
        Self {
            id: id.into(),
            remote_key,
            requested_at: Utc::now(),
        }
    }
}

/// Descriptive document committed to the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingMetadata {
    pub id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub size: u64,
    pub duration: f64,
    pub recorded_at: DateTime<Utc>,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where to send the object bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// Pre-authorized URL for the object PUT
    pub url: String,

    /// Key the object will be stored under
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_defaults() {
        let rec = Recording::capture("memo.webm", Payload::new(vec![1, 2, 3], "audio/webm"), 1.5);

        assert_eq!(rec.status, SyncStatus::Local);
        assert_eq!(rec.file_size, 3);
        assert_eq!(rec.upload_attempts, 0);
        assert!(rec.remote_key.is_none());
        assert!(!rec.touched_remote());
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            SyncStatus::Local,
            SyncStatus::Uploading,
            SyncStatus::Synced,
            SyncStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_no_direct_local_to_synced() {
        assert!(!SyncStatus::Local.can_transition_to(SyncStatus::Synced));
        assert!(SyncStatus::Local.can_transition_to(SyncStatus::Uploading));
        assert!(SyncStatus::Uploading.can_transition_to(SyncStatus::Synced));
        assert!(!SyncStatus::Synced.can_transition_to(SyncStatus::Local));
        assert!(SyncStatus::Failed.can_transition_to(SyncStatus::Local));
        assert!(SyncStatus::Local.can_transition_to(SyncStatus::Failed));
        assert!(!SyncStatus::Failed.can_transition_to(SyncStatus::Synced));
    }

    #[test]
    fn test_payload_clone_shares_buffer() {
        let payload = Payload::new(vec![7u8; 1024], "audio/webm");
        let copy = payload.clone();
        assert_eq!(copy.bytes.as_ptr(), payload.bytes.as_ptr());
        assert_eq!(copy.len(), 1024);
    }

    #[test]
    fn test_metadata_serializes_camel_case() {
        let rec = Recording::capture("a.webm", Payload::new(vec![0; 4], "audio/webm"), 2.0)
            .with_id("r1");
        let json = serde_json::to_value(rec.metadata(SyncStatus::Synced, None)).unwrap();

        assert_eq!(json["id"], "r1");
        assert_eq!(json["status"], "synced");
        assert!(json.get("recordedAt").is_some());
        assert!(json.get("error").is_none());
        assert!(json.get("key").is_none());
    }
}
