use super::export::{ExportError, ExportStatus, FileExporter};
use super::pattern::FilePattern;
use super::retire::RetirementManager;
use crate::loader::{DedupBatchLoader, HeartbeatMerger, LoadError};
use crate::record::{unix_now, LogRecord};
use crate::storage::{Sink, SinkError};
use crate::tracking::{FilePatch, Selector, TrackedFile, TrackingError, TrackingStore};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, UNIX_EPOCH};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("export error: {0}")]
    Export(#[from] ExportError),

    #[error("worker task join error: {0}")]
    Join(String),
}

/// Settings for one watcher run; immutable for the worker's lifetime.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub watch_dir: PathBuf,
    /// Retirement target; `None` disables retirement entirely.
    pub done_dir: Option<PathBuf>,
    pub interval: Duration,
    /// This shipper's own identity, reported via self-heartbeats.
    pub source_id: String,
    pub sub_id: String,
    pub batch_size: usize,
}

/// Supervisor-side handle to a spawned watcher worker.
///
/// Stop requests are cooperative: the worker checks the token at the top of
/// each cycle and per line during exports, flushes what it holds, and exits.
/// Completion of the join is the stop acknowledgment.
pub struct WatcherHandle {
    cancel: CancellationToken,
    join: JoinHandle<Result<(), WatcherError>>,
}

impl WatcherHandle {
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Clone of the stop token, for callers that need to request a stop
    /// while the handle itself is being awaited.
    pub fn stop_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn wait(&mut self) -> Result<(), WatcherError> {
        match (&mut self.join).await {
            Ok(result) => result,
            Err(err) => Err(WatcherError::Join(err.to_string())),
        }
    }
}

/// The control loop: discovers matching files, reconciles them into the
/// tracking store, exports the oldest unfinished file, retires the oldest
/// finished historical file, and emits one self-heartbeat per cycle.
///
/// Files are processed strictly one at a time, oldest first; ordering and
/// offset bookkeeping stay single-threaded on purpose.
pub struct Watcher {
    config: WatcherConfig,
    pattern: FilePattern,
    tracking: TrackingStore,
    loader: DedupBatchLoader,
    merger: HeartbeatMerger,
    retirer: Option<RetirementManager>,
    cancel: CancellationToken,
    /// Whether the most recent cycle already reported an error; used to
    /// demote the same cascading failure during shutdown to debug noise.
    squawked: bool,
}

impl Watcher {
    pub fn new(config: WatcherConfig, tracking: TrackingStore, sink: Arc<dyn Sink>) -> Self {
        let retirer = config
            .done_dir
            .clone()
            .map(|done| RetirementManager::new(config.watch_dir.clone(), done));
        Self {
            loader: DedupBatchLoader::new(sink.clone(), config.batch_size),
            merger: HeartbeatMerger::new(sink),
            pattern: FilePattern::new(),
            retirer,
            tracking,
            cancel: CancellationToken::new(),
            squawked: false,
            config,
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn tracking(&self) -> &TrackingStore {
        &self.tracking
    }

    /// Spawn the loop as a background task and hand back the handle the
    /// supervisor observes it through.
    pub fn spawn(self) -> WatcherHandle {
        let cancel = self.cancel.clone();
        let join = tokio::spawn(self.run());
        WatcherHandle { cancel, join }
    }

    pub async fn run(mut self) -> Result<(), WatcherError> {
        info!(
            watch_dir = %self.config.watch_dir.display(),
            interval = ?self.config.interval,
            retirement = self.retirer.is_some(),
            "watcher started"
        );

        while !self.cancel.is_cancelled() {
            let started = Instant::now();
            match self.cycle().await {
                Ok(()) => self.squawked = false,
                Err(err) => {
                    // Per-cycle errors are recoverable by construction:
                    // offsets are only advanced after applied work, so the
                    // next cycle re-derives anything abandoned here.
                    error!(%err, "cycle aborted; retrying on next interval");
                    self.squawked = true;
                }
            }

            let wait = self.config.interval.saturating_sub(started.elapsed());
            if sleep_or_cancel(wait, &self.cancel).await {
                break;
            }
        }

        self.shutdown().await
    }

    /// One pass of the state machine. Aborts early (without error) on a stop
    /// request; any error aborts the remaining phases of this cycle only.
    pub async fn cycle(&mut self) -> Result<(), WatcherError> {
        let discovered = self.discover()?;
        let live = discovered.last().cloned();
        self.reconcile(&discovered, live.as_deref()).await?;

        // Stage liveness before any file processing so it is reported even
        // when processing stalls.
        self.stage_self_heartbeat();

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.export_phase(live.as_deref()).await?;

        if self.cancel.is_cancelled() {
            return Ok(());
        }
        self.retire_phase().await?;

        self.loader.flush().await?;
        self.merger.flush_all().await?;
        Ok(())
    }

    /// List the watched directory and keep pattern-matching regular files,
    /// sorted ascending by name.
    fn discover(&self) -> Result<Vec<String>, WatcherError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.config.watch_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if self.pattern.matches(name) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Bring the tracking store in line with the directory snapshot: insert
    /// unknown files at offset zero, refresh changed stat fields, recompute
    /// the live classification, and drop rows for vanished files.
    async fn reconcile(
        &mut self,
        discovered: &[String],
        live: Option<&str>,
    ) -> Result<(), WatcherError> {
        let acquired_at = unix_now();

        for name in discovered {
            let path = self.config.watch_dir.join(name);
            let meta = match fs::metadata(&path) {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(filename = %name, %err, "stat failed; skipping this cycle");
                    continue;
                }
            };
            let modified = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or_default();
            let size = meta.len();

            match self.tracking.get(name).await? {
                None => {
                    let historical = Some(name.as_str()) != live;
                    let file =
                        TrackedFile::discovered(name, modified, size, acquired_at, historical)?;
                    self.tracking.insert(file).await?;
                    info!(filename = %name, size, historical, "tracking new file");
                }
                Some(known) => {
                    // A file only ever ages out of liveness; it never comes
                    // back, even if everything newer vanishes.
                    let historical = known.historical || Some(name.as_str()) != live;
                    if known.modified_at != modified
                        || known.size != size
                        || known.historical != historical
                    {
                        self.tracking
                            .update(
                                FilePatch::new(name)
                                    .modified_at(modified)
                                    .size(size)
                                    .historical(historical),
                            )
                            .await?;
                    }
                }
            }
        }

        self.tracking.sweep(discovered, acquired_at).await?;
        Ok(())
    }

    fn stage_self_heartbeat(&mut self) {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        let payload = serde_json::json!({
            "host": host,
            "pid": std::process::id(),
            "interval_secs": self.config.interval.as_secs_f64(),
            "at": chrono::Utc::now().to_rfc3339(),
        })
        .to_string();

        self.merger.stage(LogRecord::self_heartbeat(
            &self.config.source_id,
            &self.config.sub_id,
            payload,
        ));
    }

    /// Export the oldest file with unprocessed bytes, if any.
    async fn export_phase(&mut self, live: Option<&str>) -> Result<(), WatcherError> {
        let (oldest_unfinished, _) = self.tracking.oldest_newest(Selector::Unfinished).await?;
        let Some(file) = oldest_unfinished else {
            return Ok(());
        };

        let historical = Some(file.filename.as_str()) != live;
        let mut exporter = FileExporter {
            watch_dir: &self.config.watch_dir,
            tracking: &self.tracking,
            loader: &mut self.loader,
            merger: &mut self.merger,
            cancel: &self.cancel,
        };

        match exporter.export(&file, historical).await {
            Ok(ExportStatus::Completed { .. }) | Ok(ExportStatus::Cancelled) => Ok(()),
            Err(ExportError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
                // Vanished between discovery and read; the sweep on the next
                // cycle drops its tracking row.
                warn!(filename = %file.filename, "file disappeared before export");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Retire the oldest fully-ingested historical file, if retirement is
    /// enabled. The live file is never retired, even when fully read: it may
    /// still grow.
    async fn retire_phase(&mut self) -> Result<(), WatcherError> {
        let Some(retirer) = &self.retirer else {
            return Ok(());
        };

        let (oldest_finished, _) = self.tracking.oldest_newest(Selector::Finished).await?;
        let Some(file) = oldest_finished else {
            return Ok(());
        };
        if !file.historical {
            return Ok(());
        }

        if let Err(err) = retirer.retire(&self.tracking, &file.filename).await {
            // Deliberate proceed-don't-crash policy: the file stays tracked
            // and is retried on a later eligible cycle.
            error!(filename = %file.filename, %err, "retirement failed; will retry");
        }
        Ok(())
    }

    /// Clean shutdown path: flush whatever is pending and stop. An operator
    /// stop is not an error, and nothing still buffered can be lost: its
    /// offsets were never advanced, so the next run re-derives it.
    async fn shutdown(&mut self) -> Result<(), WatcherError> {
        debug!("watcher stopping; flushing pending work");
        let flush = async {
            self.loader.flush().await?;
            self.merger.flush_all().await?;
            Ok::<(), WatcherError>(())
        };
        if let Err(err) = flush.await {
            if self.squawked {
                debug!(%err, "suppressing cascading error during shutdown");
            } else {
                error!(%err, "flush during shutdown failed");
            }
        }

        let (inserted, duplicates) = self.loader.totals();
        info!(inserted, duplicates, "watcher stopped");
        Ok(())
    }
}

async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = sleep(duration) => false,
    }
}
