use super::pattern::is_compressed;
use crate::loader::{DedupBatchLoader, HeartbeatMerger, LoadError};
use crate::record::{parse_line, Parsed};
use crate::storage::SinkError;
use crate::tracking::{FilePatch, TrackedFile, TrackingError, TrackingStore};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("tracking error: {0}")]
    Tracking(#[from] TrackingError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    /// All available complete lines were applied and the offset advanced.
    Completed { lines: u64, new_offset: u64 },
    /// A stop request interrupted the read; the offset was left unchanged.
    Cancelled,
}

/// Reads one tracked file forward from its last processed offset, feeding
/// each complete line through the parser into the batch loader or the
/// heartbeat merger.
///
/// The offset is advanced only after every line read in this pass has been
/// applied; on any mid-read error it is left at the last known-good point so
/// the next cycle reprocesses from there, with the sink's content-hash dedup
/// absorbing the replay.
pub struct FileExporter<'a> {
    pub watch_dir: &'a Path,
    pub tracking: &'a TrackingStore,
    pub loader: &'a mut DedupBatchLoader,
    pub merger: &'a mut HeartbeatMerger,
    pub cancel: &'a CancellationToken,
}

impl FileExporter<'_> {
    pub async fn export(
        &mut self,
        file: &TrackedFile,
        historical: bool,
    ) -> Result<ExportStatus, ExportError> {
        // Flush around every export so a crash between exports cannot leave
        // parsed data sitting in memory indefinitely.
        self.flush_pending().await?;

        let path = self.watch_dir.join(&file.filename);
        debug!(
            filename = %file.filename,
            offset = file.processed_offset,
            historical,
            "exporting"
        );

        let result = if is_compressed(&file.filename) {
            self.read_compressed(&path, file).await
        } else {
            self.read_incremental(&path, file).await
        };

        match result {
            Ok(status) => {
                self.flush_pending().await?;
                if let ExportStatus::Completed { lines, new_offset } = status {
                    info!(
                        filename = %file.filename,
                        lines,
                        new_offset,
                        historical,
                        "export complete"
                    );
                }
                Ok(status)
            }
            Err(err) => {
                // Already-parsed records are still worth committing; the
                // offset stays put so nothing is lost either way.
                if let Err(flush_err) = self.flush_pending().await {
                    warn!(%flush_err, "flush after failed export also failed");
                }
                Err(err)
            }
        }
    }

    /// Plain file: seek to the processed offset and read complete lines to
    /// end-of-file. Reading past the recorded size is intentional; the
    /// producer may still be appending and replays dedup cleanly.
    async fn read_incremental(
        &mut self,
        path: &Path,
        file: &TrackedFile,
    ) -> Result<ExportStatus, ExportError> {
        let handle = File::open(path)?;
        let mut reader = BufReader::new(handle);
        reader.seek(SeekFrom::Start(file.processed_offset))?;

        let mut offset = file.processed_offset;
        let mut lines = 0u64;
        let mut line = String::new();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(ExportStatus::Cancelled);
            }

            line.clear();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            if !line.ends_with('\n') {
                // Partial tail the writer has not finished; leave it for the
                // next cycle rather than ingesting a truncated record.
                break;
            }

            offset += bytes as u64;
            self.apply_line(&file.filename, line.trim_end_matches(&['\r', '\n'][..]))
                .await?;
            lines += 1;
        }

        self.advance(file, offset).await?;
        Ok(ExportStatus::Completed {
            lines,
            new_offset: offset,
        })
    }

    /// Compressed file: always read whole from the start; there is no
    /// seeking inside a gzip stream. On completion the offset jumps to the
    /// compressed file's byte size.
    async fn read_compressed(
        &mut self,
        path: &Path,
        file: &TrackedFile,
    ) -> Result<ExportStatus, ExportError> {
        let handle = File::open(path)?;
        let size_at_open = handle.metadata()?.len();
        let mut reader = BufReader::new(GzDecoder::new(handle));

        let mut lines = 0u64;
        let mut line = String::new();
        loop {
            if self.cancel.is_cancelled() {
                return Ok(ExportStatus::Cancelled);
            }

            line.clear();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }

            self.apply_line(&file.filename, line.trim_end_matches(&['\r', '\n'][..]))
                .await?;
            lines += 1;
        }

        self.advance(file, size_at_open).await?;
        Ok(ExportStatus::Completed {
            lines,
            new_offset: size_at_open,
        })
    }

    async fn apply_line(&mut self, filename: &str, line: &str) -> Result<(), ExportError> {
        if line.is_empty() {
            return Ok(());
        }
        match parse_line(line) {
            Ok(Parsed::Record(record)) if record.is_heartbeat() => self.merger.stage(record),
            Ok(Parsed::Record(record)) => self.loader.push(record).await?,
            Ok(Parsed::Comment(text)) => {
                debug!(filename = %filename, comment = %text, "comment line skipped")
            }
            Err(err) => warn!(filename = %filename, %err, "dropping malformed line"),
        }
        Ok(())
    }

    async fn advance(&mut self, file: &TrackedFile, offset: u64) -> Result<(), ExportError> {
        self.tracking
            .update(
                FilePatch::new(&file.filename)
                    .processed_offset(offset)
                    .size(offset.max(file.size)),
            )
            .await?;
        Ok(())
    }

    async fn flush_pending(&mut self) -> Result<(), ExportError> {
        self.loader.flush().await?;
        self.merger.flush_all().await?;
        Ok(())
    }
}
