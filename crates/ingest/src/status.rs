use crate::health::{write_health_snapshot, HealthHandle};
use image_watcher_store::{unix_now_ms, RecordStore};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Periodic heartbeat with the total record count.
pub struct StatusReporter {
    store: Arc<dyn RecordStore>,
    health: HealthHandle,
    interval: Duration,
    health_file: Option<PathBuf>,
}

impl StatusReporter {
    pub fn new(store: Arc<dyn RecordStore>, health: HealthHandle, interval: Duration) -> Self {
        Self {
            store,
            health,
            interval,
            health_file: None,
        }
    }

    #[must_use]
    pub fn with_health_file(mut self, path: Option<PathBuf>) -> Self {
        self.health_file = path;
        self
    }

    /// One read + log. Read failures are reported and returned as `None`.
    pub async fn tick(&self) -> Option<u64> {
        let now = unix_now_ms();
        let count = match self.store.count().await {
            Ok(count) => {
                info!("Total images: {count}");
                self.health.update(|h| {
                    h.last_count = Some(count);
                    h.last_heartbeat_unix_ms = Some(now);
                    h.last_status_error = None;
                });
                Some(count)
            }
            Err(err) => {
                error!("Failed to read image count: {err}");
                let message = err.to_string();
                self.health.update(|h| {
                    h.last_heartbeat_unix_ms = Some(now);
                    h.last_status_error = Some(message);
                });
                None
            }
        };

        if let Some(path) = &self.health_file {
            if let Err(err) = write_health_snapshot(path, &self.health.snapshot()).await {
                warn!("Failed to persist health snapshot to {}: {err}", path.display());
            }
        }
        count
    }

    /// Tick immediately, then once per interval until cancelled. The wait
    /// starts only after the previous tick finished, so ticks never overlap.
    pub async fn run(self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.tick().await;
            tokio::select! {
                () = cancel.cancelled() => break,
                () = time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use image_watcher_store::{MemoryRecordStore, NewRecord, Record, StorageBackend, StoreError};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails every other count.
    #[derive(Default)]
    struct FlakyCountStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordStore for FlakyCountStore {
        fn backend(&self) -> StorageBackend {
            StorageBackend::Memory
        }

        async fn insert(&self, record: NewRecord) -> image_watcher_store::Result<Record> {
            Err(StoreError::Other(format!("read-only: {}", record.name)))
        }

        async fn count(&self) -> image_watcher_store::Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 1 {
                Err(StoreError::Unavailable("connection reset".into()))
            } else {
                Ok(call as u64)
            }
        }
    }

    #[tokio::test]
    async fn empty_store_reports_zero() {
        let health = HealthHandle::new();
        let reporter = StatusReporter::new(
            Arc::new(MemoryRecordStore::new()),
            health.clone(),
            DEFAULT_STATUS_INTERVAL,
        );

        assert_eq!(reporter.tick().await, Some(0));
        let snapshot = health.snapshot();
        assert_eq!(snapshot.last_count, Some(0));
        assert!(snapshot.last_heartbeat_unix_ms.is_some());
    }

    #[tokio::test]
    async fn read_failure_is_recorded_and_next_tick_recovers() {
        let health = HealthHandle::new();
        let reporter = StatusReporter::new(
            Arc::new(FlakyCountStore::default()),
            health.clone(),
            DEFAULT_STATUS_INTERVAL,
        );

        assert_eq!(reporter.tick().await, Some(0));
        assert_eq!(reporter.tick().await, None);
        assert!(health.snapshot().last_status_error.is_some());
        assert_eq!(reporter.tick().await, Some(2));
        assert_eq!(health.snapshot().last_status_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_interval_until_cancelled() {
        let store = Arc::new(FlakyCountStore::default());
        let health = HealthHandle::new();
        let reporter = StatusReporter::new(store.clone(), health, Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));

        time::sleep(Duration::from_secs(95)).await;
        cancel.cancel();
        task.await.unwrap();

        // t = 0, 30, 60, 90
        assert_eq!(store.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn tick_writes_health_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("health.json");
        let reporter = StatusReporter::new(
            Arc::new(MemoryRecordStore::new()),
            HealthHandle::new(),
            DEFAULT_STATUS_INTERVAL,
        )
        .with_health_file(Some(path.clone()));

        reporter.tick().await;

        let written = crate::read_health_snapshot(&path).await.unwrap().unwrap();
        assert_eq!(written.last_count, Some(0));
    }
}
