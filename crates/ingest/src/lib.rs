//! # Image Watcher Ingest
//!
//! Turns filesystem creation notifications into durable records.
//!
//! ## Pipeline
//!
//! ```text
//! Watch root (recursive)
//!     │
//!     ├──> Watch Adapter (notify)
//!     │      ├─> creation / rename-into events ──> bounded queue
//!     │      └─> watch faults ──────────────────> error channel
//!     │
//!     ├──> Dispatcher
//!     │      └─> one Ingestion Pipeline task per event ──> RecordStore::insert
//!     │
//!     └──> Status Reporter (every 30s) ──> RecordStore::count ──> heartbeat log
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use image_watcher_ingest::{ImageWatcherService, WatchServiceConfig};
//! use image_watcher_store::MemoryRecordStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), image_watcher_ingest::IngestError> {
//!     let store = Arc::new(MemoryRecordStore::new());
//!     let service = ImageWatcherService::start(WatchServiceConfig::new("/srv/images"), store)?;
//!     service
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

mod error;
mod health;
mod pipeline;
mod service;
mod status;
mod watcher;

pub use error::{IngestError, Result};
pub use health::{
    read_health_snapshot, write_health_snapshot, HealthHandle, ServiceHealth, ServiceState,
};
pub use pipeline::{IngestOutcome, IngestionPipeline};
pub use service::{validate_watch_root, ImageWatcherService, WatchServiceConfig};
pub use status::{StatusReporter, DEFAULT_STATUS_INTERVAL};
pub use watcher::{
    classify_event, watch_channel, FileEvent, WatchAdapter, WatchFault, WatchFilter, WatchSink,
    WatchStream,
};
