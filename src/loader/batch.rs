use crate::record::{LogRecord, CONTENT_HASH_LEN};
use crate::storage::{BatchOutcome, Sink, SinkError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("malformed content hash {hash:?} from {source_id} (len {len}, want {CONTENT_HASH_LEN})")]
    MalformedHash {
        hash: String,
        source_id: String,
        len: usize,
    },
}

/// Buffers parsed records and commits them to the sink in bounded batches,
/// one transaction per batch, skipping records the sink already holds.
///
/// A failed batch is not retried here: the buffer is cleared either way and
/// the caller re-derives records from the file offset on the next cycle.
pub struct DedupBatchLoader {
    sink: Arc<dyn Sink>,
    batch_size: usize,
    buffer: Vec<LogRecord>,
    inserted_total: u64,
    duplicate_total: u64,
}

impl DedupBatchLoader {
    pub fn new(sink: Arc<dyn Sink>, batch_size: usize) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            buffer: Vec::new(),
            inserted_total: 0,
            duplicate_total: 0,
        }
    }

    /// Buffer one record; at the batch threshold the buffer flushes
    /// implicitly.
    pub async fn push(&mut self, record: LogRecord) -> Result<(), LoadError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Commit everything buffered as one sink transaction. The buffer is
    /// emptied on success and on failure alike.
    pub async fn flush(&mut self) -> Result<BatchOutcome, LoadError> {
        if self.buffer.is_empty() {
            return Ok(BatchOutcome::default());
        }

        // A wrong-length hash means corrupt upstream data; abandon the
        // batch loudly instead of inserting it.
        if let Some(bad) = self
            .buffer
            .iter()
            .find(|r| r.content_hash.len() != CONTENT_HASH_LEN)
        {
            let err = LoadError::MalformedHash {
                hash: bad.content_hash.clone(),
                source_id: bad.source_id.clone(),
                len: bad.content_hash.len(),
            };
            error!(batch = self.buffer.len(), %err, "abandoning batch");
            self.buffer.clear();
            return Err(err);
        }

        let batch = std::mem::take(&mut self.buffer);
        let size = batch.len();
        let outcome = self.sink.load_batch(batch).await?;

        self.inserted_total += outcome.inserted as u64;
        self.duplicate_total += outcome.duplicates as u64;
        debug!(
            batch = size,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            "batch committed"
        );
        Ok(outcome)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Running totals since construction: (inserted, duplicates).
    pub fn totals(&self) -> (u64, u64) {
        (self.inserted_total, self.duplicate_total)
    }
}
