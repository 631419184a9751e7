//! # Image Watcher Store
//!
//! Durable, append-only storage for discovered image files.
//!
//! ## Backends
//!
//! ```text
//! StoreOptions
//!     │
//!     ├──> sqlite   (embedded file, default)
//!     ├──> postgres (server-backed)
//!     └──> memory   (volatile, tests and dry runs)
//!            │
//!            └─> Arc<dyn RecordStore>  (insert one / count all)
//! ```
//!
//! Every backend serializes concurrent access itself: callers share one
//! `Arc<dyn RecordStore>` and issue independent single-record operations.
//!
//! ## Example
//!
//! ```no_run
//! use image_watcher_store::{connect, NewRecord, StoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), image_watcher_store::StoreError> {
//!     let store = connect(&StoreOptions::default()).await?;
//!     let record = store
//!         .insert(NewRecord::new("/srv/images/photo1.jpg", "photo1.jpg"))
//!         .await?;
//!
//!     println!("stored #{} ({} total)", record.id, store.count().await?);
//!     Ok(())
//! }
//! ```

mod backend;
mod error;
mod memory;
mod postgres;
mod record;
mod sqlite;

pub use backend::{connect, StorageBackend, StoreOptions, DEFAULT_SQLITE_PATH};
pub use error::{Result, StoreError};
pub use memory::MemoryRecordStore;
pub use postgres::PostgresRecordStore;
pub use record::{unix_now_ms, NewRecord, Record};
pub use sqlite::SqliteRecordStore;

use async_trait::async_trait;

/// Insert-one / count-all persistence contract shared by the ingestion
/// pipeline and the status reporter.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Backend kind, used for start-up logging.
    fn backend(&self) -> StorageBackend;

    /// Persist one record. The returned [`Record`] carries the store-assigned id.
    async fn insert(&self, record: NewRecord) -> Result<Record>;

    /// Number of records currently persisted.
    async fn count(&self) -> Result<u64>;
}
