//! Messages exchanged with the observing UI layer.
//!
//! Delivery is at-least-once. Per-id ordering holds because every inbound
//! message is executed on the single sync lane.

use serde::{Deserialize, Serialize};

use super::recording::SyncStatus;

/// Inbound request from the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SyncMessage {
    /// Upload one recording (e.g. capture just finished)
    Upload { id: String },

    /// User-initiated retry of a failed recording; resets its attempt budget
    Retry { id: String },

    /// Delete a recording locally and remotely
    Delete {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
    },

    /// Full reconciliation sweep
    RetryAll,
}

/// Outbound notification of a status transition.
///
/// Observers must treat these as idempotent hints and reconcile by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    pub id: String,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusChanged {
    pub fn new(id: impl Into<String>, status: SyncStatus) -> Self {
        Self {
            id: id.into(),
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
