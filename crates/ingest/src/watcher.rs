use crate::{IngestError, Result};
use log::{debug, warn};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// One qualifying notification: the full path and its last segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub name: Option<String>,
}

impl FileEvent {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty());
        Self { path, name }
    }
}

/// Failure of the notification mechanism itself (not of one file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFault {
    /// The hand-off queue was full; at least one event was lost.
    QueueOverflow,
    /// The backend dropped events and asks for a rescan.
    RescanRequired,
    Backend(String),
}

impl fmt::Display for WatchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueOverflow => f.write_str("event queue overflowed; events were dropped"),
            Self::RescanRequired => f.write_str("watch backend lost events and requested a rescan"),
            Self::Backend(msg) => write!(f, "watch backend error: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WatchFilter {
    /// Also forward data / last-write-time modifications.
    pub ingest_modified: bool,
}

/// Producer half handed to the notify callback: creation events on a bounded
/// queue, faults on a separate unbounded error channel.
#[derive(Clone)]
pub struct WatchSink {
    events: mpsc::Sender<FileEvent>,
    faults: mpsc::UnboundedSender<WatchFault>,
    overflow_pending: Arc<AtomicBool>,
}

/// Consumer half, drained by the service dispatcher.
pub struct WatchStream {
    pub events: mpsc::Receiver<FileEvent>,
    pub faults: mpsc::UnboundedReceiver<WatchFault>,
    overflow_pending: Arc<AtomicBool>,
}

pub fn watch_channel(capacity: usize) -> (WatchSink, WatchStream) {
    let (event_tx, event_rx) = mpsc::channel(capacity.max(1));
    let (fault_tx, fault_rx) = mpsc::unbounded_channel();
    let overflow_pending = Arc::new(AtomicBool::new(false));
    (
        WatchSink {
            events: event_tx,
            faults: fault_tx,
            overflow_pending: overflow_pending.clone(),
        },
        WatchStream {
            events: event_rx,
            faults: fault_rx,
            overflow_pending,
        },
    )
}

impl WatchSink {
    pub fn send_event(&self, event: FileEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(lost)) => {
                debug!("Dropping event for {} (queue full)", lost.path.display());
                // One overflow report until the consumer acknowledges it.
                if !self.overflow_pending.swap(true, Ordering::AcqRel) {
                    self.send_fault(WatchFault::QueueOverflow);
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    pub fn send_fault(&self, fault: WatchFault) {
        let _ = self.faults.send(fault);
    }

    /// Route one raw notify result.
    pub fn forward(&self, result: notify::Result<Event>, filter: WatchFilter) {
        match result {
            Ok(event) => {
                if event.need_rescan() {
                    self.send_fault(WatchFault::RescanRequired);
                }
                for file_event in classify_event(&event, filter) {
                    self.send_event(file_event);
                }
            }
            Err(err) => self.send_fault(WatchFault::Backend(err.to_string())),
        }
    }
}

impl WatchStream {
    /// Re-arm overflow reporting after a `QueueOverflow` fault was handled.
    pub fn acknowledge_overflow(&self) {
        self.overflow_pending.store(false, Ordering::Release);
    }
}

/// Events that should become records, one per path.
pub fn classify_event(event: &Event, filter: WatchFilter) -> Vec<FileEvent> {
    let qualifies = match event.kind {
        EventKind::Create(CreateKind::Folder) => false,
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => true,
        EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Metadata(MetadataKind::WriteTime)) => {
            filter.ingest_modified
        }
        _ => false,
    };
    if !qualifies {
        return Vec::new();
    }

    let check_dir = !matches!(event.kind, EventKind::Create(CreateKind::File));
    event
        .paths
        .iter()
        .filter(|path| !(check_dir && path.is_dir()))
        .map(|path| FileEvent::from_path(path.clone()))
        .collect()
}

/// Persistent recursive subscription. Dropping it unsubscribes.
pub struct WatchAdapter {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
}

impl WatchAdapter {
    pub fn subscribe(
        root: &Path,
        filter: WatchFilter,
        sink: WatchSink,
        poll_interval: Duration,
    ) -> Result<Self> {
        let root = root.to_path_buf();
        let mut watcher = RecommendedWatcher::new(
            move |res| sink.forward(res, filter),
            NotifyConfig::default().with_poll_interval(poll_interval),
        )?;
        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| IngestError::Other(format!("failed to watch {}: {e}", root.display())))?;
        Ok(Self {
            root,
            watcher: Some(watcher),
        })
    }

    /// Stop delivery. A late callback from the backend thread only reaches a
    /// closed channel once the dispatcher has exited.
    pub fn unsubscribe(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.root) {
                warn!("Failed to unwatch {}: {err}", self.root.display());
            }
        }
    }
}

impl Drop for WatchAdapter {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, Flag, RemoveKind};
    use pretty_assertions::assert_eq;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn create_file_qualifies() {
        let evt = event(EventKind::Create(CreateKind::File), "/r/photo1.jpg");
        assert_eq!(
            classify_event(&evt, WatchFilter::default()),
            vec![FileEvent {
                path: PathBuf::from("/r/photo1.jpg"),
                name: Some("photo1.jpg".into()),
            }]
        );
    }

    #[test]
    fn folder_creation_is_ignored() {
        let evt = event(EventKind::Create(CreateKind::Folder), "/r/album");
        assert!(classify_event(&evt, WatchFilter::default()).is_empty());
    }

    #[test]
    fn rename_into_tree_qualifies_but_source_half_does_not() {
        let to = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            "/r/moved.png",
        );
        let from = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            "/r/old.png",
        );
        assert_eq!(classify_event(&to, WatchFilter::default()).len(), 1);
        assert!(classify_event(&from, WatchFilter::default()).is_empty());
    }

    #[test]
    fn modifications_need_opt_in() {
        let evt = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            "/r/edited.jpg",
        );
        assert!(classify_event(&evt, WatchFilter::default()).is_empty());
        let filter = WatchFilter {
            ingest_modified: true,
        };
        assert_eq!(classify_event(&evt, filter).len(), 1);
    }

    #[test]
    fn removals_and_access_are_ignored() {
        let filter = WatchFilter {
            ingest_modified: true,
        };
        let remove = event(EventKind::Remove(RemoveKind::File), "/r/gone.jpg");
        let access = event(EventKind::Access(AccessKind::Read), "/r/read.jpg");
        assert!(classify_event(&remove, filter).is_empty());
        assert!(classify_event(&access, filter).is_empty());
    }

    #[test]
    fn one_event_per_path() {
        let evt = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/r/a.jpg"))
            .add_path(PathBuf::from("/r/b.jpg"));
        let names: Vec<_> = classify_event(&evt, WatchFilter::default())
            .into_iter()
            .filter_map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a.jpg".to_string(), "b.jpg".to_string()]);
    }

    #[test]
    fn root_path_has_no_name() {
        assert_eq!(FileEvent::from_path("/").name, None);
    }

    #[test]
    fn backend_errors_and_rescan_flags_become_faults() {
        let (sink, mut stream) = watch_channel(4);
        sink.forward(
            Err(notify::Error::generic("inotify queue overflow")),
            WatchFilter::default(),
        );
        sink.forward(
            Ok(Event::new(EventKind::Other).set_flag(Flag::Rescan)),
            WatchFilter::default(),
        );

        assert!(matches!(stream.faults.try_recv(), Ok(WatchFault::Backend(_))));
        assert_eq!(stream.faults.try_recv().ok(), Some(WatchFault::RescanRequired));
        assert!(stream.events.try_recv().is_err());
    }

    #[test]
    fn full_queue_reports_one_overflow_until_acknowledged() {
        let (sink, mut stream) = watch_channel(1);
        for i in 0..4 {
            sink.send_event(FileEvent::from_path(format!("/r/{i}.jpg")));
        }

        assert_eq!(stream.faults.try_recv().ok(), Some(WatchFault::QueueOverflow));
        assert!(stream.faults.try_recv().is_err());

        stream.acknowledge_overflow();
        sink.send_event(FileEvent::from_path("/r/late.jpg"));
        assert_eq!(stream.faults.try_recv().ok(), Some(WatchFault::QueueOverflow));
        assert_eq!(stream.events.try_recv().unwrap().name.as_deref(), Some("0.jpg"));
    }
}
