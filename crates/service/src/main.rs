//! Image Watcher service
//!
//! Watches a directory tree and records every newly created file in a
//! database, logging the running total every 30 seconds.
//!
//! ## Configuration
//!
//! Layers, later wins: defaults, `image-watcher.toml` (next to the binary, in
//! the working directory, or `--config`), `IMAGE_WATCHER_*` environment
//! variables, command-line flags.
//!
//! ```toml
//! watch_path = "/srv/images"
//!
//! [storage]
//! backend = "sqlite"
//! path = "image-watcher.db"
//! ```
//!
//! Stop with Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use image_watcher_ingest::ImageWatcherService;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

mod config;
mod logging;
mod signal;

use config::{Overrides, ServiceConfig};

#[derive(Debug, Parser)]
#[command(name = "image-watcher", version, about)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory tree to watch
    #[arg(long, value_name = "DIR")]
    watch_path: Option<PathBuf>,

    /// Storage backend: sqlite, postgres or memory
    #[arg(long, value_name = "BACKEND")]
    storage: Option<String>,

    /// Postgres connection URL
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Print the resolved configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            watch_path: self.watch_path.clone(),
            storage: self.storage.clone(),
            database_url: self.database_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(err) => {
            if logging::init(None).is_ok() && log::log_enabled!(log::Level::Error) {
                error!("Invalid configuration: {err:#}");
            } else {
                eprintln!("Invalid configuration: {err:#}");
            }
            return ExitCode::FAILURE;
        }
    };

    if cli.print_config {
        return match config.to_toml() {
            Ok(rendered) => {
                print!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(err) = logging::init(config.log_file.as_deref()) {
        eprintln!("Failed to initialise logging: {err:#}");
        return ExitCode::FAILURE;
    }

    info!("Starting up the service");
    match run(config).await {
        Ok(()) => {
            info!("Service stopped");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("There was a problem starting the service: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServiceConfig) -> Result<()> {
    info!(
        "Running on {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );

    let watch_config = config.watch_service_config()?;
    let store = image_watcher_store::connect(&config.storage)
        .await
        .context("failed to open record store")?;
    info!("Record store backend: {}", store.backend());

    let service =
        ImageWatcherService::start(watch_config, store).context("failed to start watch service")?;
    service.run_until(signal::shutdown_signal()).await?;
    Ok(())
}
