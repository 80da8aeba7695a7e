use super::types::{FilePatch, TrackedFile, TrackingError};
use duckdb::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Row filter for `oldest_newest`; finished means `processed >= size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    Finished,
    Unfinished,
}

impl Selector {
    fn where_clause(self) -> &'static str {
        match self {
            Selector::All => "",
            Selector::Finished => "WHERE processed >= size",
            Selector::Unfinished => "WHERE processed < size",
        }
    }
}

/// Durable per-file ingestion state, the source of truth for what has been
/// ingested so far. All mutating operations commit before returning.
pub struct TrackingStore {
    conn: Arc<Mutex<Connection>>,
}

impl TrackingStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrackingError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self, TrackingError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, TrackingError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS logfiles (
                 filename   VARCHAR PRIMARY KEY,
                 ymd        VARCHAR NOT NULL,
                 hh         VARCHAR NOT NULL,
                 modified   DOUBLE NOT NULL,
                 size       BIGINT NOT NULL,
                 acquired   DOUBLE NOT NULL,
                 processed  BIGINT NOT NULL,
                 historical BOOLEAN NOT NULL
             );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn get(&self, filename: &str) -> Result<Option<TrackedFile>, TrackingError> {
        let conn = self.conn.clone();
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let file = conn
                .query_row(
                    "SELECT filename, ymd, hh, modified, size, acquired, processed, historical
                     FROM logfiles WHERE filename = ?",
                    params![filename],
                    row_to_file,
                )
                .optional()?;
            Ok(file)
        })
        .await?
    }

    /// Insert a new row; the filename must not already be tracked.
    pub async fn insert(&self, file: TrackedFile) -> Result<TrackedFile, TrackingError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let existing: i64 = conn.query_row(
                "SELECT count(*) FROM logfiles WHERE filename = ?",
                params![file.filename],
                |row| row.get(0),
            )?;
            if existing > 0 {
                return Err(TrackingError::AlreadyTracked(file.filename));
            }

            conn.execute(
                "INSERT INTO logfiles
                     (filename, ymd, hh, modified, size, acquired, processed, historical)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    file.filename,
                    file.day_key,
                    file.hour_key,
                    file.modified_at,
                    file.size as i64,
                    file.acquired_at,
                    file.processed_offset as i64,
                    file.historical,
                ],
            )?;
            Ok(file)
        })
        .await?
    }

    /// Patch a subset of fields; the filename must already be tracked.
    pub async fn update(&self, patch: FilePatch) -> Result<TrackedFile, TrackingError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let updated = conn.execute(
                "UPDATE logfiles SET
                     modified   = coalesce(?, modified),
                     size       = coalesce(?, size),
                     acquired   = coalesce(?, acquired),
                     processed  = coalesce(?, processed),
                     historical = coalesce(?, historical)
                 WHERE filename = ?",
                params![
                    patch.modified_at,
                    patch.size.map(|v| v as i64),
                    patch.acquired_at,
                    patch.processed_offset.map(|v| v as i64),
                    patch.historical,
                    patch.filename,
                ],
            )?;
            if updated == 0 {
                return Err(TrackingError::NotTracked(patch.filename));
            }

            let file = conn.query_row(
                "SELECT filename, ymd, hh, modified, size, acquired, processed, historical
                 FROM logfiles WHERE filename = ?",
                params![patch.filename],
                row_to_file,
            )?;
            Ok(file)
        })
        .await?
    }

    /// Insert when the filename is unknown (the patch must then carry a full
    /// stat snapshot), otherwise apply the patch to the existing row.
    pub async fn upsert(&self, patch: FilePatch) -> Result<TrackedFile, TrackingError> {
        match self.get(&patch.filename).await? {
            Some(_) => self.update(patch).await,
            None => self.insert(TrackedFile::try_from(patch)?).await,
        }
    }

    /// Remove a tracking row. Deleting an unknown filename is a no-op.
    pub async fn delete(&self, filename: &str) -> Result<(), TrackingError> {
        let conn = self.conn.clone();
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            conn.execute("DELETE FROM logfiles WHERE filename = ?", params![filename])?;
            Ok(())
        })
        .await?
    }

    pub async fn count(&self, filename: Option<&str>) -> Result<u64, TrackingError> {
        let conn = self.conn.clone();
        let filename = filename.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let count: i64 = match filename {
                Some(name) => conn.query_row(
                    "SELECT count(*) FROM logfiles WHERE filename = ?",
                    params![name],
                    |row| row.get(0),
                )?,
                None => conn.query_row("SELECT count(*) FROM logfiles", [], |row| row.get(0))?,
            };
            Ok(count as u64)
        })
        .await?
    }

    /// Oldest and newest rows matching the selector, ordered by filename.
    pub async fn oldest_newest(
        &self,
        selector: Selector,
    ) -> Result<(Option<TrackedFile>, Option<TrackedFile>), TrackingError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut ends = ["ASC", "DESC"].iter().map(|order| {
                let sql = format!(
                    "SELECT filename, ymd, hh, modified, size, acquired, processed, historical
                     FROM logfiles {} ORDER BY filename {} LIMIT 1",
                    selector.where_clause(),
                    order,
                );
                conn.query_row(&sql, [], row_to_file).optional()
            });
            let oldest = ends.next().unwrap()?;
            let newest = ends.next().unwrap()?;
            Ok((oldest, newest))
        })
        .await?
    }

    /// Drop rows for files no longer present in the watched directory and
    /// stamp the acquisition time on the rest. An empty snapshot is ignored
    /// rather than interpreted as "delete everything".
    pub async fn sweep(&self, present: &[String], acquired_at: f64) -> Result<(), TrackingError> {
        if present.is_empty() {
            return Ok(());
        }

        let conn = self.conn.clone();
        let present = present.to_vec();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT filename FROM logfiles")?;
            let tracked: Vec<String> = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<_, _>>()?;

            for name in tracked {
                if !present.contains(&name) {
                    debug!(filename = %name, "dropping tracking row for vanished file");
                    conn.execute("DELETE FROM logfiles WHERE filename = ?", params![name])?;
                }
            }
            conn.execute("UPDATE logfiles SET acquired = ?", params![acquired_at])?;
            Ok(())
        })
        .await?
    }
}

fn row_to_file(row: &Row<'_>) -> Result<TrackedFile, duckdb::Error> {
    Ok(TrackedFile {
        filename: row.get(0)?,
        day_key: row.get(1)?,
        hour_key: row.get(2)?,
        modified_at: row.get(3)?,
        size: row.get::<_, i64>(4)? as u64,
        acquired_at: row.get(5)?,
        processed_offset: row.get::<_, i64>(6)? as u64,
        historical: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, size: u64, processed: u64) -> TrackedFile {
        let mut file = TrackedFile::discovered(name, 100.0, size, 200.0, false).unwrap();
        file.processed_offset = processed;
        file
    }

    async fn store() -> TrackingStore {
        TrackingStore::in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_roundtrip() {
        let store = store().await;
        let inserted = store.insert(file("151213-02.log", 100, 0)).await.unwrap();
        let fetched = store.get("151213-02.log").await.unwrap().unwrap();
        assert_eq!(inserted, fetched);
        assert_eq!(fetched.day_key, "151213");
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_insert_existing_is_error() {
        let store = store().await;
        store.insert(file("151213-02.log", 100, 0)).await.unwrap();
        assert!(matches!(
            store.insert(file("151213-02.log", 100, 0)).await,
            Err(TrackingError::AlreadyTracked(_))
        ));
    }

    #[tokio::test]
    async fn test_update_missing_is_error() {
        let store = store().await;
        let patch = FilePatch::new("151213-02.log").size(5);
        assert!(matches!(
            store.update(patch).await,
            Err(TrackingError::NotTracked(_))
        ));
    }

    #[tokio::test]
    async fn test_update_patches_subset() {
        let store = store().await;
        store.insert(file("151213-02.log", 100, 10)).await.unwrap();

        let updated = store
            .update(FilePatch::new("151213-02.log").processed_offset(50))
            .await
            .unwrap();
        assert_eq!(updated.processed_offset, 50);
        // Untouched fields survive the patch.
        assert_eq!(updated.size, 100);
        assert_eq!(updated.modified_at, 100.0);
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_patches() {
        let store = store().await;
        let patch = FilePatch::new("151213-02.log")
            .modified_at(1.0)
            .size(100)
            .acquired_at(2.0)
            .historical(false);
        let inserted = store.upsert(patch).await.unwrap();
        assert_eq!(inserted.processed_offset, 0);

        let patched = store
            .upsert(FilePatch::new("151213-02.log").size(150))
            .await
            .unwrap();
        assert_eq!(patched.size, 150);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oldest_newest_orders_by_filename() {
        let store = store().await;
        // Identical mtimes on purpose: filename is the chronological key.
        store.insert(file("151213-03.log", 100, 100)).await.unwrap();
        store.insert(file("151213-02.log", 100, 40)).await.unwrap();
        store.insert(file("151214-01.log", 100, 0)).await.unwrap();

        let (oldest, newest) = store.oldest_newest(Selector::All).await.unwrap();
        assert_eq!(oldest.unwrap().filename, "151213-02.log");
        assert_eq!(newest.unwrap().filename, "151214-01.log");

        let (oldest, _) = store.oldest_newest(Selector::Unfinished).await.unwrap();
        assert_eq!(oldest.unwrap().filename, "151213-02.log");

        let (oldest, newest) = store.oldest_newest(Selector::Finished).await.unwrap();
        assert_eq!(oldest.as_ref().unwrap().filename, "151213-03.log");
        assert_eq!(newest.unwrap().filename, "151213-03.log");
    }

    #[tokio::test]
    async fn test_oldest_newest_empty() {
        let store = store().await;
        let (oldest, newest) = store.oldest_newest(Selector::All).await.unwrap();
        assert!(oldest.is_none());
        assert!(newest.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = store().await;
        store.insert(file("151213-02.log", 100, 0)).await.unwrap();
        store.delete("151213-02.log").await.unwrap();
        store.delete("151213-02.log").await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_drops_vanished_and_stamps_acquired() {
        let store = store().await;
        store.insert(file("151213-02.log", 100, 0)).await.unwrap();
        store.insert(file("151213-03.log", 100, 0)).await.unwrap();

        store
            .sweep(&["151213-03.log".to_string()], 999.0)
            .await
            .unwrap();

        assert!(store.get("151213-02.log").await.unwrap().is_none());
        let kept = store.get("151213-03.log").await.unwrap().unwrap();
        assert_eq!(kept.acquired_at, 999.0);
    }

    #[tokio::test]
    async fn test_sweep_ignores_empty_snapshot() {
        let store = store().await;
        store.insert(file("151213-02.log", 100, 0)).await.unwrap();
        store.sweep(&[], 999.0).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 1);
    }
}
