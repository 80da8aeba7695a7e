use crate::record::LogRecord;
use crate::storage::{Sink, SinkError};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Staging map of the latest known heartbeat per `(source_id, sub_id)`.
///
/// Staging applies newest-transmit-timestamp-wins against the in-memory map
/// only; the sink independently re-checks its stored value at flush time, so
/// flushing is safe to replay across restarts.
pub struct HeartbeatMerger {
    sink: Arc<dyn Sink>,
    staged: HashMap<(String, String), LogRecord>,
}

impl HeartbeatMerger {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            staged: HashMap::new(),
        }
    }

    /// Keep the record only if it is newer than anything staged for its key.
    pub fn stage(&mut self, record: LogRecord) {
        let key = record.producer_key();
        match self.staged.get(&key) {
            Some(held) if record.transmit_ts <= held.transmit_ts => {}
            _ => {
                self.staged.insert(key, record);
            }
        }
    }

    /// Merge every staged heartbeat into the sink, draining the map. Stale
    /// entries (the sink already holds something newer) are dropped without
    /// error.
    pub async fn flush_all(&mut self) -> Result<(), SinkError> {
        if self.staged.is_empty() {
            return Ok(());
        }

        let staged: Vec<LogRecord> = self.staged.drain().map(|(_, r)| r).collect();
        for record in staged {
            let written = self.sink.merge_heartbeat(&record).await?;
            debug!(
                source_id = %record.source_id,
                sub_id = %record.sub_id,
                transmit_ts = record.transmit_ts,
                written,
                "heartbeat merged"
            );
        }
        Ok(())
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}
