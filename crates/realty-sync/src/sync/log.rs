//! Append-only audit trail of sync attempts.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{EntityKind, SourceSystem, UnknownVariant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Success,
    Failed,
}

impl SyncStatus {
    pub fn label(self) -> &'static str {
        match self {
            SyncStatus::Pending => "PENDING",
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, SyncStatus::Pending)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SyncStatus {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            _ => Err(UnknownVariant {
                kind: "sync status",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: u64,
    pub source: SourceSystem,
    pub entity_type: EntityKind,
    pub action: String,
    pub status: SyncStatus,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncLog {
    pub source: SourceSystem,
    pub entity_type: EntityKind,
    pub action: String,
    pub payload: Value,
}

/// Read filter; every present field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SyncLogFilter {
    #[serde(default)]
    pub source: Option<SourceSystem>,
    #[serde(default)]
    pub entity_type: Option<EntityKind>,
    #[serde(default)]
    pub status: Option<SyncStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SyncLogFilter {
    fn matches(&self, entry: &SyncLogEntry) -> bool {
        self.source.map_or(true, |source| entry.source == source)
            && self
                .entity_type
                .map_or(true, |kind| entry.entity_type == kind)
            && self.status.map_or(true, |status| entry.status == status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncLogError {
    #[error("sync log entry {0} not found")]
    NotFound(u64),
    #[error("sync log entry {0} already reached a terminal state")]
    AlreadyTerminal(u64),
    #[error("a sync log entry can only complete as SUCCESS or FAILED")]
    NotTerminal,
    #[error("sync log unavailable: {0}")]
    Unavailable(String),
}

/// Storage for [`SyncLogEntry`] rows.
pub trait SyncLogStore: Send + Sync {
    /// Record the start of an attempt in `PENDING`.
    fn begin(&self, entry: NewSyncLog) -> Result<SyncLogEntry, SyncLogError>;

    /// Move a pending entry to its terminal state. Allowed exactly once.
    fn complete(
        &self,
        id: u64,
        status: SyncStatus,
        payload: Value,
        error: Option<String>,
    ) -> Result<SyncLogEntry, SyncLogError>;

    /// Matching entries, newest first.
    fn list(&self, filter: &SyncLogFilter) -> Result<Vec<SyncLogEntry>, SyncLogError>;
}

#[derive(Debug, Default)]
pub struct MemorySyncLog {
    entries: Mutex<Vec<SyncLogEntry>>,
    sequence: AtomicU64,
}

impl MemorySyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<SyncLogEntry>>, SyncLogError> {
        self.entries
            .lock()
            .map_err(|_| SyncLogError::Unavailable("lock poisoned".to_string()))
    }
}

impl SyncLogStore for MemorySyncLog {
    fn begin(&self, entry: NewSyncLog) -> Result<SyncLogEntry, SyncLogError> {
        let row = SyncLogEntry {
            id: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            source: entry.source,
            entity_type: entry.entity_type,
            action: entry.action,
            status: SyncStatus::Pending,
            payload: entry.payload,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.lock()?.push(row.clone());
        Ok(row)
    }

    fn complete(
        &self,
        id: u64,
        status: SyncStatus,
        payload: Value,
        error: Option<String>,
    ) -> Result<SyncLogEntry, SyncLogError> {
        if !status.is_terminal() {
            return Err(SyncLogError::NotTerminal);
        }

        let mut entries = self.lock()?;
        let row = entries
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or(SyncLogError::NotFound(id))?;
        if row.status.is_terminal() {
            return Err(SyncLogError::AlreadyTerminal(id));
        }

        row.status = status;
        row.payload = payload;
        row.error = error;
        row.completed_at = Some(Utc::now());
        Ok(row.clone())
    }

    fn list(&self, filter: &SyncLogFilter) -> Result<Vec<SyncLogEntry>, SyncLogError> {
        let entries = self.lock()?;
        let mut rows: Vec<SyncLogEntry> = entries
            .iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}
