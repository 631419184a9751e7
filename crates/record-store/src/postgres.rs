use crate::{NewRecord, Record, RecordStore, Result, StorageBackend};
use async_trait::async_trait;
use log::debug;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS images (
    id BIGSERIAL PRIMARY KEY,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    discovered_at_unix_ms BIGINT NOT NULL
)";

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(url)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        debug!("Postgres schema ready");

        Ok(Self { pool })
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Postgres
    }

    async fn insert(&self, record: NewRecord) -> Result<Record> {
        record.validate()?;
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO images (path, name, discovered_at_unix_ms) VALUES ($1, $2, $3) RETURNING id",
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
