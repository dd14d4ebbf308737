//! Durable local store backed by SQLite.
//!
//! Single source of truth for "has this audio left the device yet".
//! Recordings and pending deletes survive process restarts; every write is
//! a single statement or a single transaction, so a concurrent reader never
//! sees a half-applied update.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use thiserror::Error;
use tracing::debug;

use crate::domain::{Payload, PendingDelete, Recording, StatusPatch, SyncStatus};

/// Errors that can occur in the local store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Recording not found: {0}")]
    NotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store connection lock poisoned")]
    Poisoned,

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Illegal status change for {id}: {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: SyncStatus,
        to: SyncStatus,
    },
}

const RECORDING_COLUMNS: &str = "id, payload, content_type, filename, file_size, duration_secs, \
     recorded_at, status, remote_key, upload_attempts, last_error";

/// Counts per status, for status views
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub local: usize,
    pub uploading: usize,
    pub synced: usize,
    pub failed: usize,
    pub pending_deletes: usize,
}

impl StoreSummary {
    /// Total recordings still on-device
    pub fn total(&self) -> usize {
        self.local + self.uploading + self.synced + self.failed
    }

    /// Whether anything is left for the coordinator to drive
    pub fn has_unresolved_work(&self) -> bool {
        self.local + self.uploading + self.pending_deletes > 0
    }
}

/// SQLite-backed recording store
pub struct LocalStore {
    conn: Mutex<Connection>,
}

impl LocalStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;

            CREATE TABLE IF NOT EXISTS recordings (
                id              TEXT PRIMARY KEY,
                payload         BLOB NOT NULL,
                content_type    TEXT NOT NULL,
                filename        TEXT NOT NULL,
                file_size       INTEGER NOT NULL,
                duration_secs   REAL NOT NULL,
                recorded_at     TEXT NOT NULL,
                status          TEXT NOT NULL,
                remote_key      TEXT,
                upload_attempts INTEGER NOT NULL DEFAULT 0,
                last_error      TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_recordings_status
                ON recordings(status);

            CREATE TABLE IF NOT EXISTS pending_deletes (
                id           TEXT PRIMARY KEY,
                remote_key   TEXT,
                requested_at TEXT NOT NULL
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert or replace a recording
    pub fn put(&self, recording: &Recording) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO recordings ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                RECORDING_COLUMNS
            ),
            params![
                recording.id,
                recording.payload.bytes.as_ref(),
                recording.payload.content_type,
                recording.filename,
                recording.file_size as i64,
                recording.duration_secs,
                recording.recorded_at.to_rfc3339(),
                recording.status.as_str(),
                recording.remote_key,
                recording.upload_attempts,
                recording.last_error,
            ],
        )?;
        debug!(id = %recording.id, status = %recording.status, "Stored recording");
        Ok(())
    }

    /// All recordings, oldest capture first
    pub fn get_all(&self) -> Result<Vec<Recording>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recordings ORDER BY recorded_at ASC",
            RECORDING_COLUMNS
        ))?;
        let rows = stmt.query_map([], recording_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Get a specific recording by ID
    pub fn get_by_id(&self, id: &str) -> Result<Option<Recording>, StoreError> {
        let conn = self.conn()?;
        let recording = conn
            .query_row(
                &format!("SELECT {} FROM recordings WHERE id = ?1", RECORDING_COLUMNS),
                params![id],
                recording_from_row,
            )
            .optional()?;
        Ok(recording)
    }

    /// Recordings in any of the given statuses, oldest capture first
    pub fn get_by_status(&self, statuses: &[SyncStatus]) -> Result<Vec<Recording>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM recordings WHERE status IN ({}) ORDER BY recorded_at ASC",
            RECORDING_COLUMNS,
            placeholders(statuses.len())
        ))?;
        let rows = stmt.query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            recording_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// IDs of recordings in any of the given statuses, without loading payloads
    pub fn ids_by_status(&self, statuses: &[SyncStatus]) -> Result<Vec<String>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM recordings WHERE status IN ({}) ORDER BY recorded_at ASC",
            placeholders(statuses.len())
        ))?;
        let rows = stmt.query_map(
            params_from_iter(statuses.iter().map(|s| s.as_str())),
            |row| row.get::<_, String>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Change status and apply a partial update atomically.
    ///
    /// Fields present in `patch` overwrite, absent ones are preserved.
    /// Reaching `synced` clears `last_error`. Changes that are not an edge
    /// of the status state machine are rejected and leave the row as is.
    pub fn update_status(
        &self,
        id: &str,
        status: SyncStatus,
        patch: StatusPatch,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let current: Option<String> = tx
            .query_row(
                "SELECT status FROM recordings WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let current = match current {
            Some(raw) => raw.parse::<SyncStatus>().map_err(StoreError::Corrupt)?,
            None => return Err(StoreError::NotFound(id.to_string())),
        };
        if !current.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                id: id.to_string(),
                from: current,
                to: status,
            });
        }

        tx.execute(
            "UPDATE recordings SET
                status = ?1,
                upload_attempts = COALESCE(?2, upload_attempts),
                remote_key = COALESCE(?3, remote_key),
                last_error = CASE WHEN ?1 = 'synced' THEN NULL ELSE COALESCE(?4, last_error) END
             WHERE id = ?5",
            params![
                status.as_str(),
                patch.upload_attempts,
                patch.remote_key,
                patch.error,
                id
            ],
        )?;
        tx.commit()?;

        debug!(%id, from = %current, to = %status, "Updated recording status");
        Ok(())
    }

    /// Move a failed recording back to `local` with a fresh attempt budget.
    ///
    /// Returns false if the recording is not in `failed` status.
    pub fn reset_for_retry(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE recordings SET status = 'local', upload_attempts = 0
             WHERE id = ?1 AND status = 'failed'",
            params![id],
        )?;
        Ok(changed > 0)
    }

    /// Remove a recording. Returns whether a row was deleted.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM recordings WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Record a remote deletion that still has to happen
    pub fn add_pending_delete(&self, entry: &PendingDelete) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert_pending_delete(&conn, entry)?;
        Ok(())
    }

    /// All pending deletes, oldest request first
    pub fn list_pending_deletes(&self) -> Result<Vec<PendingDelete>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, remote_key, requested_at FROM pending_deletes ORDER BY requested_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PendingDelete {
                id: row.get(0)?,
                remote_key: row.get(1)?,
                requested_at: parse_timestamp(row, 2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Remove a pending delete once the remote side confirmed it
    pub fn remove_pending_delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM pending_deletes WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Persist the deletion intent and drop the local recording atomically
    pub fn stage_delete(&self, entry: &PendingDelete) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_pending_delete(&tx, entry)?;
        tx.execute("DELETE FROM recordings WHERE id = ?1", params![entry.id])?;
        tx.commit()?;
        debug!(id = %entry.id, "Staged pending delete");
        Ok(())
    }

    /// Counts per status plus pending deletes
    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.conn()?;
        let mut summary = StoreSummary::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM recordings GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            let count = count as usize;
            match status.parse::<SyncStatus>().map_err(StoreError::Corrupt)? {
                SyncStatus::Local => summary.local = count,
                SyncStatus::Uploading => summary.uploading = count,
                SyncStatus::Synced => summary.synced = count,
                SyncStatus::Failed => summary.failed = count,
            }
        }

        let pending: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_deletes", [], |row| row.get(0))?;
        summary.pending_deletes = pending as usize;

        Ok(summary)
    }
}

fn insert_pending_delete(conn: &Connection, entry: &PendingDelete) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO pending_deletes (id, remote_key, requested_at)
         VALUES (?1, ?2, ?3)",
        params![entry.id, entry.remote_key, entry.requested_at.to_rfc3339()],
    )
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn recording_from_row(row: &Row<'_>) -> rusqlite::Result<Recording> {
    let status_raw: String = row.get(7)?;
    let status = status_raw.parse::<SyncStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;

    Ok(Recording {
        id: row.get(0)?,
        payload: Payload {
            bytes: Bytes::from(row.get::<_, Vec<u8>>(1)?),
            content_type: row.get(2)?,
        },
        filename: row.get(3)?,
        file_size: row.get::<_, i64>(4)? as u64,
        duration_secs: row.get(5)?,
        recorded_at: parse_timestamp(row, 6)?,
        status,
        remote_key: row.get(8)?,
        upload_attempts: row.get(9)?,
        last_error: row.get(10)?,
    })
}
