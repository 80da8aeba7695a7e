use crate::loader::DEFAULT_BATCH_SIZE;
use crate::record::LEGACY_SUB_ID;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TRACKING_FILENAME: &str = "logship-tracking.duckdb";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory polled for `yymmdd-hh.log[.gz]` files.
    pub watch_dir: PathBuf,
    /// Subdirectory of `watch_dir` that ingested files are moved into.
    /// Omitting it disables retirement entirely.
    #[serde(default)]
    pub done_subdir: Option<String>,
    /// Polling interval between watcher cycles.
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,
    pub identity: IdentityConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

fn default_interval() -> Duration {
    Duration::from_secs(6)
}

/// This shipper's own producer identity, used for self-heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub source_id: String,
    #[serde(default = "default_sub_id")]
    pub sub_id: String,
}

fn default_sub_id() -> String {
    LEGACY_SUB_ID.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Defaults to `{watch_dir}/logship-tracking.duckdb`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    pub fn tracking_path(&self) -> PathBuf {
        self.tracking
            .path
            .clone()
            .unwrap_or_else(|| self.watch_dir.join(DEFAULT_TRACKING_FILENAME))
    }

    pub fn done_dir(&self) -> Option<PathBuf> {
        self.done_subdir
            .as_ref()
            .map(|subdir| self.watch_dir.join(subdir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(done_subdir: Option<&str>) -> Config {
        Config {
            watch_dir: PathBuf::from("/var/log/xlog"),
            done_subdir: done_subdir.map(str::to_string),
            interval: default_interval(),
            identity: IdentityConfig {
                source_id: "shipper01".to_string(),
                sub_id: default_sub_id(),
            },
            sink: SinkConfig {
                path: PathBuf::from("/var/lib/logship/sink.duckdb"),
                batch_size: default_batch_size(),
            },
            tracking: TrackingConfig::default(),
        }
    }

    #[test]
    fn test_tracking_path_defaults_into_watch_dir() {
        assert_eq!(
            config(None).tracking_path(),
            PathBuf::from("/var/log/xlog").join(DEFAULT_TRACKING_FILENAME)
        );
    }

    #[test]
    fn test_done_dir() {
        assert_eq!(
            config(Some("done")).done_dir(),
            Some(PathBuf::from("/var/log/xlog/done"))
        );
        assert_eq!(config(None).done_dir(), None);
    }
}
