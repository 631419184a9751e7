use crate::{NewRecord, Record, RecordStore, Result, StorageBackend};
use async_trait::async_trait;
use log::debug;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS images (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    discovered_at_unix_ms INTEGER NOT NULL
)";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedded file-backed store. WAL mode lets the heartbeat read while
/// ingestion tasks write; the pool serializes writers.
pub struct SqliteRecordStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteRecordStore {
    /// Open (creating if needed) the database file and ensure the schema exists.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        debug!("SQLite schema ready at {}", path.display());

        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the pool. Subsequent operations fail with a database error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Sqlite
    }

    async fn insert(&self, record: NewRecord) -> Result<Record> {
        record.validate()?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO images (path, name, discovered_at_unix_ms) VALUES (?1, ?2, ?3) RETURNING id",
        )
        .bind(&record.path)
        .bind(&record.name)
        .bind(record.discovered_at_unix_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(record.into_record(id))
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
