use crate::health::{HealthHandle, ServiceHealth, ServiceState};
use crate::pipeline::IngestionPipeline;
use crate::status::{StatusReporter, DEFAULT_STATUS_INTERVAL};
use crate::watcher::{watch_channel, WatchAdapter, WatchFault, WatchFilter, WatchStream};
use crate::{IngestError, Result};
use image_watcher_store::RecordStore;
use log::{error, info, warn};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_NOTIFY_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct WatchServiceConfig {
    pub watch_root: PathBuf,
    pub status_interval: Duration,
    pub event_queue_capacity: usize,
    pub ingest_modified: bool,
    /// Only used by the polling fallback backend.
    pub notify_poll_interval: Duration,
    pub health_file: Option<PathBuf>,
}

impl WatchServiceConfig {
    pub fn new(watch_root: impl Into<PathBuf>) -> Self {
        Self {
            watch_root: watch_root.into(),
            status_interval: DEFAULT_STATUS_INTERVAL,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            ingest_modified: false,
            notify_poll_interval: DEFAULT_NOTIFY_POLL_INTERVAL,
            health_file: None,
        }
    }
}

/// Running watch service: watch adapter, event dispatcher and status reporter
/// sharing one cancellation token.
pub struct ImageWatcherService {
    root: PathBuf,
    health: HealthHandle,
    cancel: CancellationToken,
    pipeline: IngestionPipeline,
    adapter: Option<WatchAdapter>,
    dispatcher: Option<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
}

impl ImageWatcherService {
    /// Validate the root, subscribe, and launch the background tasks. Must be
    /// called inside a tokio runtime. Errors here are start-up failures.
    pub fn start(config: WatchServiceConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        let health = HealthHandle::new();
        health.set_state(ServiceState::Starting);

        let root = match validate_watch_root(&config.watch_root) {
            Ok(root) => root,
            Err(err) => {
                health.set_state(ServiceState::Stopped);
                return Err(err);
            }
        };

        let (sink, stream) = watch_channel(config.event_queue_capacity);
        let filter = WatchFilter {
            ingest_modified: config.ingest_modified,
        };
        let adapter =
            match WatchAdapter::subscribe(&root, filter, sink, config.notify_poll_interval) {
                Ok(adapter) => adapter,
                Err(err) => {
                    health.set_state(ServiceState::Stopped);
                    return Err(err);
                }
            };
        info!("Watching {} (recursive)", root.display());

        let cancel = CancellationToken::new();
        let pipeline = IngestionPipeline::new(store.clone(), health.clone());

        let dispatcher = tokio::spawn(run_dispatcher(
            stream,
            pipeline.clone(),
            health.clone(),
            cancel.clone(),
        ));

        let reporter = StatusReporter::new(store, health.clone(), config.status_interval)
            .with_health_file(config.health_file.clone());
        let reporter = tokio::spawn(reporter.run(cancel.clone()));

        health.set_state(ServiceState::Running);

        Ok(Self {
            root,
            health,
            cancel,
            pipeline,
            adapter: Some(adapter),
            dispatcher: Some(dispatcher),
            reporter: Some(reporter),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn health(&self) -> ServiceHealth {
        self.health.snapshot()
    }

    #[must_use]
    pub fn health_stream(&self) -> watch::Receiver<ServiceHealth> {
        self.health.subscribe()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until `signal` resolves or the token is cancelled elsewhere, then
    /// shut down.
    pub async fn run_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let cancel = self.cancel.clone();
        tokio::select! {
            () = signal => info!("Shutdown signal received"),
            () = cancel.cancelled() => info!("Service cancelled"),
        }
        self.shutdown().await
    }

    /// Cancel both activities, unsubscribe, and wait for in-flight ingestion.
    pub async fn shutdown(mut self) -> Result<()> {
        self.health.set_state(ServiceState::Stopping);
        self.cancel.cancel();

        if let Some(mut adapter) = self.adapter.take() {
            adapter.unsubscribe();
        }

        let mut failures = Vec::new();
        for (label, handle) in [
            ("dispatcher", self.dispatcher.take()),
            ("status reporter", self.reporter.take()),
        ] {
            if let Some(handle) = handle {
                if let Err(err) = handle.await {
                    warn!("{label} task ended abnormally: {err}");
                    failures.push(format!("{label}: {err}"));
                }
            }
        }

        self.pipeline.drain().await;
        self.health.set_state(ServiceState::Stopped);
        info!("Watch service stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(IngestError::Other(format!(
                "background tasks failed: {}",
                failures.join("; ")
            )))
        }
    }
}

impl Drop for ImageWatcherService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The root must exist, be a directory, and be listable.
pub fn validate_watch_root(root: &Path) -> Result<PathBuf> {
    if root.as_os_str().is_empty() {
        return Err(IngestError::InvalidWatchRoot("watch path is empty".into()));
    }
    let canonical = root.canonicalize().map_err(|e| {
        IngestError::InvalidWatchRoot(format!("{}: {e}", root.display()))
    })?;
    if !canonical.is_dir() {
        return Err(IngestError::InvalidWatchRoot(format!(
            "{} is not a directory",
            canonical.display()
        )));
    }
    std::fs::read_dir(&canonical).map_err(|e| {
        IngestError::InvalidWatchRoot(format!("{} is not readable: {e}", canonical.display()))
    })?;
    Ok(canonical)
}

/// Drain watch output: faults are reported, events are handed to the pipeline
/// as independent tasks. Stops scheduling as soon as cancellation is observed.
async fn run_dispatcher(
    mut stream: WatchStream,
    pipeline: IngestionPipeline,
    health: HealthHandle,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(fault) = stream.faults.recv() => {
                report_fault(&fault, &health);
                if fault == WatchFault::QueueOverflow {
                    stream.acknowledge_overflow();
                }
            }
            event = stream.events.recv() => match event {
                Some(event) => {
                    pipeline.dispatch(event);
                }
                None => break,
            },
        }
    }
}

fn report_fault(fault: &WatchFault, health: &HealthHandle) {
    error!("CRITICAL: watch mechanism failure: {fault}; new files may go unrecorded until restart");
    let message = fault.to_string();
    health.update(|h| {
        h.watch_degraded = true;
        h.watch_errors += 1;
        h.last_watch_error = Some(message);
    });
}
