use crate::health::HealthHandle;
use crate::watcher::FileEvent;
use image_watcher_store::{NewRecord, Record, RecordStore};
use log::{debug, error, info};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Persisted(Record),
    /// Unnamed event, dropped before reaching the store.
    Skipped,
    Failed(String),
}

/// Turns creation events into records. Each event is handled on its own task;
/// failures are logged and counted, never propagated.
#[derive(Clone)]
pub struct IngestionPipeline {
    store: Arc<dyn RecordStore>,
    health: HealthHandle,
    tracker: TaskTracker,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn RecordStore>, health: HealthHandle) -> Self {
        Self {
            store,
            health,
            tracker: TaskTracker::new(),
        }
    }

    /// Process one event to completion: construct, insert, log.
    pub async fn ingest(&self, event: FileEvent) -> IngestOutcome {
        let Some(name) = event.name.filter(|n| !n.is_empty()) else {
            debug!("Ignoring unnamed event for {}", event.path.display());
            self.health.update(|h| h.events_skipped += 1);
            return IngestOutcome::Skipped;
        };

        match self.store.insert(NewRecord::new(&event.path, name.clone())).await {
            Ok(record) => {
                info!("New image received: {name}");
                self.health.update(|h| h.records_persisted += 1);
                IngestOutcome::Persisted(record)
            }
            Err(err) => {
                error!("CRITICAL: failed to record image {name}: {err}");
                let message = err.to_string();
                self.health.update(|h| h.ingest_failures += 1);
                IngestOutcome::Failed(message)
            }
        }
    }

    /// Fire-and-forget ingestion on a tracked task. Returns `false` once the
    /// pipeline is closed and the event was not scheduled.
    pub fn dispatch(&self, event: FileEvent) -> bool {
        if self.tracker.is_closed() {
            debug!("Pipeline closed; not scheduling {}", event.path.display());
            return false;
        }
        let pipeline = self.clone();
        self.tracker.spawn(async move {
            pipeline.ingest(event).await;
        });
        true
    }

    /// Number of ingestion tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop scheduling new work and wait for in-flight tasks.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
