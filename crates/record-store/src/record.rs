use crate::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// A persisted discovery. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub path: String,
    pub name: String,
    pub discovered_at_unix_ms: i64,
}

/// A record as submitted by the pipeline, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub path: String,
    pub name: String,
    pub discovered_at_unix_ms: i64,
}

impl NewRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn new(path: impl AsRef<Path>, name: impl Into<String>) -> Self {
        Self::with_timestamp(path, name, unix_now_ms())
    }

    pub fn with_timestamp(
        path: impl AsRef<Path>,
        name: impl Into<String>,
        discovered_at_unix_ms: i64,
    ) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            name: name.into(),
            discovered_at_unix_ms,
        }
    }

    /// Reject records that must never reach a backend.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(StoreError::InvalidRecord("path must not be empty".into()));
        }
        if self.name.is_empty() {
            return Err(StoreError::InvalidRecord(format!(
                "name must not be empty (path: {})",
                self.path
            )));
        }
        Ok(())
    }

    pub(crate) fn into_record(self, id: i64) -> Record {
        Record {
            id,
            path: self.path,
            name: self.name,
            discovered_at_unix_ms: self.discovered_at_unix_ms,
        }
    }
}

pub fn unix_now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| i64::try_from(dur.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
