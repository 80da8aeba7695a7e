use super::traits::{BatchOutcome, Sink, SinkError};
use crate::record::LogRecord;
use async_trait::async_trait;
use duckdb::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// DuckDB implementation of the record sink.
///
/// Two tables share a layout: `xlog` holds every deduplicated record,
/// `xlog_hb` holds the latest heartbeat per `(srcid, subid)` key.
pub struct DuckDbSink {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let conn = Connection::open(path.as_ref())?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory sink for tests.
    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of rows in the record table, optionally for one content hash.
    pub async fn record_count(&self, content_hash: Option<String>) -> Result<i64, SinkError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let count = match content_hash {
                Some(hash) => conn.query_row(
                    "SELECT count(*) FROM xlog WHERE sha1 = ?",
                    params![hash],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT count(*) FROM xlog", [], |row| row.get(0))?,
            };
            Ok(count)
        })
        .await?
    }

    /// Stored heartbeat transmit timestamp for one producer key, if any.
    pub async fn heartbeat_ts(
        &self,
        source_id: String,
        sub_id: String,
    ) -> Result<Option<f64>, SinkError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let ts = conn
                .query_row(
                    "SELECT txts FROM xlog_hb WHERE srcid = ? AND subid = ?",
                    params![source_id, sub_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(ts)
        })
        .await?
    }
}

#[async_trait]
impl Sink for DuckDbSink {
    async fn init_schema(&self) -> Result<(), SinkError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute_batch(
                "CREATE SEQUENCE IF NOT EXISTS xlog_id_seq;
                 CREATE TABLE IF NOT EXISTS xlog (
                     id    BIGINT DEFAULT nextval('xlog_id_seq'),
                     rxts  DOUBLE NOT NULL,
                     txts  DOUBLE NOT NULL,
                     srcid VARCHAR NOT NULL,
                     subid VARCHAR NOT NULL,
                     el    VARCHAR NOT NULL,
                     sl    VARCHAR NOT NULL,
                     sha1  VARCHAR NOT NULL,
                     kvs   VARCHAR NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_xlog_sha1 ON xlog(sha1);
                 CREATE TABLE IF NOT EXISTS xlog_hb (
                     rxts  DOUBLE NOT NULL,
                     txts  DOUBLE NOT NULL,
                     srcid VARCHAR NOT NULL,
                     subid VARCHAR NOT NULL,
                     el    VARCHAR NOT NULL,
                     sl    VARCHAR NOT NULL,
                     sha1  VARCHAR NOT NULL,
                     kvs   VARCHAR NOT NULL,
                     PRIMARY KEY (srcid, subid)
                 );",
            )?;
            Ok(())
        })
        .await?
    }

    async fn load_batch(&self, records: Vec<LogRecord>) -> Result<BatchOutcome, SinkError> {
        if records.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;
            let mut outcome = BatchOutcome::default();

            for record in &records {
                let existing: i64 = tx.query_row(
                    "SELECT count(*) FROM xlog WHERE sha1 = ?",
                    params![record.content_hash],
                    |row| row.get(0),
                )?;
                if existing > 0 {
                    outcome.duplicates += 1;
                    continue;
                }

                tx.execute(
                    "INSERT INTO xlog (rxts, txts, srcid, subid, el, sl, sha1, kvs)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        record.receive_ts,
                        record.transmit_ts,
                        record.source_id,
                        record.sub_id,
                        record.error_level,
                        record.sub_level,
                        record.content_hash,
                        record.payload,
                    ],
                )?;
                outcome.inserted += 1;
            }

            tx.commit()?;
            Ok(outcome)
        })
        .await?
    }

    async fn merge_heartbeat(&self, record: &LogRecord) -> Result<bool, SinkError> {
        let conn = self.conn.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;

            let stored: Option<f64> = tx
                .query_row(
                    "SELECT txts FROM xlog_hb WHERE srcid = ? AND subid = ?",
                    params![record.source_id, record.sub_id],
                    |row| row.get(0),
                )
                .optional()?;

            let written = match stored {
                Some(stored_ts) if record.transmit_ts <= stored_ts => false,
                Some(_) => {
                    tx.execute(
                        "UPDATE xlog_hb
                         SET rxts = ?, txts = ?, el = ?, sl = ?, sha1 = ?, kvs = ?
                         WHERE srcid = ? AND subid = ?",
                        params![
                            record.receive_ts,
                            record.transmit_ts,
                            record.error_level,
                            record.sub_level,
                            record.content_hash,
                            record.payload,
                            record.source_id,
                            record.sub_id,
                        ],
                    )?;
                    true
                }
                None => {
                    tx.execute(
                        "INSERT INTO xlog_hb (rxts, txts, srcid, subid, el, sl, sha1, kvs)
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                        params![
                            record.receive_ts,
                            record.transmit_ts,
                            record.source_id,
                            record.sub_id,
                            record.error_level,
                            record.sub_level,
                            record.content_hash,
                            record.payload,
                        ],
                    )?;
                    true
                }
            };

            tx.commit()?;
            Ok(written)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sha1_hex;

    fn record(payload: &str, transmit_ts: f64) -> LogRecord {
        LogRecord {
            format_version: 1,
            receive_ts: transmit_ts + 0.5,
            transmit_ts,
            source_id: "nx01".to_string(),
            sub_id: "____".to_string(),
            error_level: "0".to_string(),
            sub_level: "a".to_string(),
            content_hash: sha1_hex(payload.as_bytes()),
            payload: payload.to_string(),
        }
    }

    async fn sink() -> DuckDbSink {
        let sink = DuckDbSink::in_memory().unwrap();
        sink.init_schema().await.unwrap();
        sink
    }

    #[tokio::test]
    async fn test_load_batch_inserts_and_dedups() {
        let sink = sink().await;

        let batch = vec![record("a", 1.0), record("b", 2.0)];
        let outcome = sink.load_batch(batch.clone()).await.unwrap();
        assert_eq!(outcome, BatchOutcome { inserted: 2, duplicates: 0 });

        // Re-ingesting identical bytes must not create duplicate rows.
        let outcome = sink.load_batch(batch).await.unwrap();
        assert_eq!(outcome, BatchOutcome { inserted: 0, duplicates: 2 });
        assert_eq!(sink.record_count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_load_batch_dedups_within_batch() {
        let sink = sink().await;
        let outcome = sink
            .load_batch(vec![record("a", 1.0), record("a", 1.0)])
            .await
            .unwrap();
        assert_eq!(outcome, BatchOutcome { inserted: 1, duplicates: 1 });
    }

    #[tokio::test]
    async fn test_merge_heartbeat_newest_wins_either_order() {
        let sink = sink().await;
        let older = record("hb", 100.0);
        let newer = record("hb2", 200.0);

        assert!(sink.merge_heartbeat(&older).await.unwrap());
        assert!(sink.merge_heartbeat(&newer).await.unwrap());
        assert_eq!(
            sink.heartbeat_ts("nx01".into(), "____".into()).await.unwrap(),
            Some(200.0)
        );

        // Replaying the older heartbeat never regresses the stored value.
        assert!(!sink.merge_heartbeat(&older).await.unwrap());
        assert_eq!(
            sink.heartbeat_ts("nx01".into(), "____".into()).await.unwrap(),
            Some(200.0)
        );
    }

    #[tokio::test]
    async fn test_merge_heartbeat_equal_ts_is_noop() {
        let sink = sink().await;
        let hb = record("hb", 100.0);
        assert!(sink.merge_heartbeat(&hb).await.unwrap());
        assert!(!sink.merge_heartbeat(&hb).await.unwrap());
    }
}
