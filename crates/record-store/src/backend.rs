use crate::{
    MemoryRecordStore, PostgresRecordStore, RecordStore, Result, SqliteRecordStore, StoreError,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_SQLITE_PATH: &str = "image-watcher.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Postgres,
    Memory,
}

impl StorageBackend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = StoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "memory" | "inmemory" | "in-memory" => Ok(Self::Memory),
            other => Err(StoreError::InvalidConfig(format!(
                "unknown storage backend '{other}' (expected sqlite, postgres or memory)"
            ))),
        }
    }
}

/// Backend selection plus the connection parameters each backend needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub backend: StorageBackend,
    /// SQLite database file.
    pub path: PathBuf,
    /// Postgres connection URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: PathBuf::from(DEFAULT_SQLITE_PATH),
            url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StoreOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(StoreError::InvalidConfig(
                "max_connections must be at least 1".into(),
            ));
        }
        match self.backend {
            StorageBackend::Sqlite if self.path.as_os_str().is_empty() => Err(
                StoreError::InvalidConfig("sqlite backend requires a database path".into()),
            ),
            StorageBackend::Postgres if self.postgres_url().is_none() => Err(
                StoreError::InvalidConfig("postgres backend requires a connection url".into()),
            ),
            _ => Ok(()),
        }
    }

    fn postgres_url(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

/// Open the configured backend. Any failure here is a start-up failure.
pub async fn connect(options: &StoreOptions) -> Result<Arc<dyn RecordStore>> {
    options.validate()?;

    let store: Arc<dyn RecordStore> = match options.backend {
        StorageBackend::Sqlite => {
            info!("Opening SQLite record store at {}", options.path.display());
            Arc::new(SqliteRecordStore::open(&options.path, options.max_connections).await?)
        }
        StorageBackend::Postgres => {
            let url = options.postgres_url().ok_or_else(|| {
                StoreError::InvalidConfig("postgres backend requires a connection url".into())
            })?;
            info!("Connecting to Postgres record store");
            Arc::new(PostgresRecordStore::connect(url, options.max_connections).await?)
        }
        StorageBackend::Memory => {
            info!("Using in-memory record store; records are lost on shutdown");
            Arc::new(MemoryRecordStore::new())
        }
    };
    Ok(store)
}
