use crate::config::load_config;
use crate::storage::{DuckDbSink, Sink, SinkError};
use crate::tracking::{TrackingError, TrackingStore};
use crate::watcher::{Watcher, WatcherConfig, WatcherError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("tracking store error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("watcher did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/logship/config.yml");
            eprintln!("  /etc/logship/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'logship config init' to generate one.");
            std::process::exit(1);
        }
    };

    run_watcher(&config_path).await.map_err(|e| e.into())
}

async fn run_watcher(config_path: &PathBuf) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "loading configuration");
    let config = load_config(config_path)?;

    info!(
        watch_dir = %config.watch_dir.display(),
        interval = ?config.interval,
        done_subdir = config.done_subdir.as_deref().unwrap_or("<retirement disabled>"),
        sink = %config.sink.path.display(),
        "starting"
    );

    // Opening either store is the one worker-fatal failure class: without
    // them the worker cannot run at all.
    let tracking = TrackingStore::open(config.tracking_path())?;
    let sink = Arc::new(DuckDbSink::open(&config.sink.path)?);
    sink.init_schema().await?;

    let interval = config.interval;
    let watcher = Watcher::new(
        WatcherConfig {
            watch_dir: config.watch_dir.clone(),
            done_dir: config.done_dir(),
            interval,
            source_id: config.identity.source_id.clone(),
            sub_id: config.identity.sub_id.clone(),
            batch_size: config.sink.batch_size,
        },
        tracking,
        sink,
    );

    let mut handle = watcher.spawn();
    let stop = handle.stop_token();
    info!("watcher running, press Ctrl+C to shut down");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("shutdown signal received");
            stop.cancel();
        }
        result = handle.wait() => {
            // The worker only exits on its own when something fatal
            // happened; report it once and stop here.
            return match result {
                Ok(()) => {
                    info!("watcher exited");
                    Ok(())
                }
                Err(err) => {
                    error!(%err, "watcher failed");
                    Err(err.into())
                }
            };
        }
    }

    // Bounded join: a worker that ignores the stop request for several
    // polling intervals is a hard shutdown failure, not something to wait
    // out silently.
    let limit = 3 * interval;
    match tokio::time::timeout(limit, handle.wait()).await {
        Ok(Ok(())) => {
            info!("shutdown complete");
            Ok(())
        }
        Ok(Err(err)) => {
            error!(%err, "error during shutdown");
            Err(err.into())
        }
        Err(_) => Err(RunError::ShutdownTimeout(limit)),
    }
}
