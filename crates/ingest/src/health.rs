use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Observable service condition. `watch_degraded` is a flag, not a state:
/// the service keeps running after a watch-mechanism failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub state: ServiceState,
    pub watch_degraded: bool,
    pub last_watch_error: Option<String>,
    pub watch_errors: u64,
    pub records_persisted: u64,
    pub ingest_failures: u64,
    pub events_skipped: u64,
    pub last_count: Option<u64>,
    pub last_heartbeat_unix_ms: Option<i64>,
    pub last_status_error: Option<String>,
}

impl ServiceHealth {
    pub const fn initial() -> Self {
        Self {
            state: ServiceState::Stopped,
            watch_degraded: false,
            last_watch_error: None,
            watch_errors: 0,
            records_persisted: 0,
            ingest_failures: 0,
            events_skipped: 0,
            last_count: None,
            last_heartbeat_unix_ms: None,
            last_status_error: None,
        }
    }
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self::initial()
    }
}

/// Shared publisher for [`ServiceHealth`]. Cloning shares the same channel.
#[derive(Clone)]
pub struct HealthHandle {
    tx: Arc<watch::Sender<ServiceHealth>>,
}

impl HealthHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServiceHealth::initial());
        Self { tx: Arc::new(tx) }
    }

    pub fn update(&self, apply: impl FnOnce(&mut ServiceHealth)) {
        self.tx.send_modify(apply);
    }

    pub fn set_state(&self, state: ServiceState) {
        self.update(|health| health.state = state);
    }

    #[must_use]
    pub fn snapshot(&self) -> ServiceHealth {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ServiceHealth> {
        self.tx.subscribe()
    }
}

impl Default for HealthHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Atomically replace `path` with the JSON form of `health`.
pub async fn write_health_snapshot(path: &Path, health: &ServiceHealth) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let bytes = serde_json::to_vec_pretty(health)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

pub async fn read_health_snapshot(path: &Path) -> Result<Option<ServiceHealth>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = tokio::fs::read(path).await?;
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn updates_are_visible_to_subscribers() {
        let health = HealthHandle::new();
        let rx = health.subscribe();
        health.update(|h| {
            h.records_persisted += 2;
            h.watch_degraded = true;
        });
        assert_eq!(rx.borrow().records_persisted, 2);
        assert!(health.snapshot().watch_degraded);
    }

    #[tokio::test]
    async fn snapshot_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run").join("health.json");
        let mut health = ServiceHealth::initial();
        health.state = ServiceState::Running;
        health.last_count = Some(7);

        write_health_snapshot(&path, &health).await.unwrap();

        assert_eq!(read_health_snapshot(&path).await.unwrap(), Some(health));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn missing_snapshot_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.json");
        assert_eq!(read_health_snapshot(&missing).await.unwrap(), None);
    }
}
