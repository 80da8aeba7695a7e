use crate::record::LogRecord;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("blocking task join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result of committing one batch to the sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Transactional record sink.
///
/// The transport behind this trait is a collaborator, not part of the
/// pipeline; the pipeline only relies on the transactional contract below.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn init_schema(&self) -> Result<(), SinkError>;

    /// Commit a batch of records as one transaction, skipping any record
    /// whose content hash is already present in the record table.
    async fn load_batch(&self, records: Vec<LogRecord>) -> Result<BatchOutcome, SinkError>;

    /// Merge one heartbeat: overwrite (or insert) the stored row for the
    /// record's `(source_id, sub_id)` only when its transmit timestamp is
    /// strictly greater than the stored one. Returns whether the sink was
    /// written. Replaying an old heartbeat is a harmless no-op.
    async fn merge_heartbeat(&self, record: &LogRecord) -> Result<bool, SinkError>;
}
