use anyhow::{bail, Context, Result};
use image_watcher_ingest::WatchServiceConfig;
use image_watcher_store::{StorageBackend, StoreOptions};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "image-watcher.toml";

const ENV_WATCH_PATH: &str = "IMAGE_WATCHER_WATCH_PATH";
const ENV_STORAGE: &str = "IMAGE_WATCHER_STORAGE";
const ENV_DB_PATH: &str = "IMAGE_WATCHER_DB_PATH";
const ENV_DATABASE_URL: &str = "IMAGE_WATCHER_DATABASE_URL";
const ENV_STATUS_INTERVAL: &str = "IMAGE_WATCHER_STATUS_INTERVAL_SECS";
const ENV_LOG_FILE: &str = "IMAGE_WATCHER_LOG_FILE";
const ENV_HEALTH_FILE: &str = "IMAGE_WATCHER_HEALTH_FILE";

/// Command-line overrides; the last configuration layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub watch_path: Option<PathBuf>,
    pub storage: Option<String>,
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_path: Option<PathBuf>,
    pub status_interval_secs: u64,
    pub event_queue_capacity: usize,
    pub ingest_modified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_file: Option<PathBuf>,
    pub storage: StoreOptions,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            watch_path: None,
            status_interval_secs: 30,
            event_queue_capacity: 1024,
            ingest_modified: false,
            log_file: None,
            health_file: None,
            storage: StoreOptions::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("invalid configuration file")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }

    /// Apply `IMAGE_WATCHER_*` variables. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(path) = get(ENV_WATCH_PATH) {
            self.watch_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = get(ENV_STORAGE) {
            self.storage.backend = parse_backend(&backend, ENV_STORAGE)?;
        }
        if let Some(path) = get(ENV_DB_PATH) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(url) = get(ENV_DATABASE_URL) {
            self.storage.url = Some(url);
        }
        if let Some(secs) = get(ENV_STATUS_INTERVAL) {
            self.status_interval_secs = secs
                .parse()
                .with_context(|| format!("{ENV_STATUS_INTERVAL} must be a whole number of seconds"))?;
        }
        if let Some(path) = get(ENV_LOG_FILE) {
            self.log_file = Some(PathBuf::from(path));
        }
        if let Some(path) = get(ENV_HEALTH_FILE) {
            self.health_file = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) -> Result<()> {
        if let Some(path) = &overrides.watch_path {
            self.watch_path = Some(path.clone());
        }
        if let Some(backend) = &overrides.storage {
            self.storage.backend = parse_backend(backend, "--storage")?;
        }
        if let Some(url) = &overrides.database_url {
            self.storage.url = Some(url.clone());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self
            .watch_path
            .as_ref()
            .map_or(true, |p| p.as_os_str().is_empty())
        {
            bail!("watch_path is not configured (set it in {CONFIG_FILE_NAME}, {ENV_WATCH_PATH} or --watch-path)");
        }
        if self.status_interval_secs == 0 {
            bail!("status_interval_secs must be greater than zero");
        }
        if self.event_queue_capacity == 0 {
            bail!("event_queue_capacity must be greater than zero");
        }
        self.storage.validate()?;
        Ok(())
    }

    pub fn watch_service_config(&self) -> Result<WatchServiceConfig> {
        let root = self
            .watch_path
            .clone()
            .context("watch_path is not configured")?;
        let mut config = WatchServiceConfig::new(root);
        config.status_interval = Duration::from_secs(self.status_interval_secs);
        config.event_queue_capacity = self.event_queue_capacity;
        config.ingest_modified = self.ingest_modified;
        config.health_file = self.health_file.clone();
        Ok(config)
    }
}

fn parse_backend(raw: &str, source: &str) -> Result<StorageBackend> {
    raw.parse::<StorageBackend>()
        .with_context(|| format!("invalid storage backend from {source}"))
}

/// Explicit path must exist; otherwise look next to the executable, then in
/// the working directory.
pub fn locate_config_file(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            bail!("configuration file {} does not exist", path.display());
        }
        return Ok(Some(path.to_path_buf()));
    }

    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    let candidates = exe_dir
        .into_iter()
        .chain(env::current_dir().ok())
        .map(|dir| dir.join(CONFIG_FILE_NAME));
    for candidate in candidates {
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Defaults, then file, then environment, then command line.
pub fn load(config_file: Option<&Path>, overrides: &Overrides) -> Result<ServiceConfig> {
    let mut config = match locate_config_file(config_file)? {
        Some(path) => ServiceConfig::from_file(&path)?,
        None => ServiceConfig::default(),
    };
    config.apply_env(|key| env::var(key).ok())?;
    config.apply_overrides(overrides)?;
    config.validate()?;
    Ok(config)
}
