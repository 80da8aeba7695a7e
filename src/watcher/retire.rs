use crate::tracking::{TrackingError, TrackingStore};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RetireError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("{filename:?} already exists in the done directory")]
    DestinationExists { filename: String },

    #[error("move of {filename:?} did not verify (source gone: {source_gone}, destination present: {destination_present})")]
    VerifyFailed {
        filename: String,
        source_gone: bool,
        destination_present: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetireOutcome {
    /// The file was moved and its tracking entry dropped.
    Moved,
    /// An earlier call already moved it; only leftover tracking was cleaned.
    AlreadyMoved,
    /// The file vanished without being moved; nothing to do.
    SourceMissing,
}

/// Moves fully-ingested, non-live files out of the watched directory and
/// drops their tracking entries.
///
/// Every precondition is re-verified at call time, so calling twice for the
/// same filename is a no-op the second time. A failed move leaves the file
/// tracked; the scheduler retries it on a later cycle instead of crashing
/// the loop.
pub struct RetirementManager {
    watch_dir: PathBuf,
    done_dir: PathBuf,
}

impl RetirementManager {
    pub fn new(watch_dir: PathBuf, done_dir: PathBuf) -> Self {
        Self {
            watch_dir,
            done_dir,
        }
    }

    pub async fn retire(
        &self,
        tracking: &TrackingStore,
        filename: &str,
    ) -> Result<RetireOutcome, RetireError> {
        let source = self.watch_dir.join(filename);
        let destination = self.done_dir.join(filename);

        if !source.exists() {
            if destination.exists() {
                // A previous call moved the file but may have died before
                // cleaning up; deleting an absent row is a no-op.
                tracking.delete(filename).await?;
                return Ok(RetireOutcome::AlreadyMoved);
            }
            warn!(filename = %filename, "file to retire is gone from the watched directory");
            return Ok(RetireOutcome::SourceMissing);
        }

        if destination.exists() {
            return Err(RetireError::DestinationExists {
                filename: filename.to_string(),
            });
        }

        fs::create_dir_all(&self.done_dir)?;
        fs::rename(&source, &destination)?;

        let source_gone = !source.exists();
        let destination_present = destination.exists();
        if !source_gone || !destination_present {
            return Err(RetireError::VerifyFailed {
                filename: filename.to_string(),
                source_gone,
                destination_present,
            });
        }

        tracking.delete(filename).await?;
        info!(
            filename = %filename,
            done_dir = %self.done_dir.display(),
            "file retired"
        );
        Ok(RetireOutcome::Moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::TrackedFile;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        tracking: TrackingStore,
        retirer: RetirementManager,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let retirer = RetirementManager::new(
                dir.path().to_path_buf(),
                dir.path().join("done"),
            );
            Self {
                dir,
                tracking: TrackingStore::in_memory().unwrap(),
                retirer,
            }
        }

        async fn seed(&self, name: &str) {
            std::fs::write(self.dir.path().join(name), b"data\n").unwrap();
            self.tracking
                .insert(TrackedFile::discovered(name, 1.0, 5, 2.0, true).unwrap())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_retire_moves_and_untracks() {
        let fixture = Fixture::new();
        fixture.seed("151213-02.log").await;

        let outcome = fixture
            .retirer
            .retire(&fixture.tracking, "151213-02.log")
            .await
            .unwrap();
        assert_eq!(outcome, RetireOutcome::Moved);

        assert!(!fixture.dir.path().join("151213-02.log").exists());
        assert!(fixture.dir.path().join("done/151213-02.log").exists());
        assert!(fixture.tracking.get("151213-02.log").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_retire_is_noop() {
        let fixture = Fixture::new();
        fixture.seed("151213-02.log").await;

        fixture
            .retirer
            .retire(&fixture.tracking, "151213-02.log")
            .await
            .unwrap();
        let outcome = fixture
            .retirer
            .retire(&fixture.tracking, "151213-02.log")
            .await
            .unwrap();
        assert_eq!(outcome, RetireOutcome::AlreadyMoved);
    }

    #[tokio::test]
    async fn test_vanished_source_is_tolerated() {
        let fixture = Fixture::new();
        let outcome = fixture
            .retirer
            .retire(&fixture.tracking, "151213-02.log")
            .await
            .unwrap();
        assert_eq!(outcome, RetireOutcome::SourceMissing);
    }

    #[tokio::test]
    async fn test_existing_destination_is_error() {
        let fixture = Fixture::new();
        fixture.seed("151213-02.log").await;
        std::fs::create_dir_all(fixture.dir.path().join("done")).unwrap();
        std::fs::write(fixture.dir.path().join("done/151213-02.log"), b"old\n").unwrap();

        assert!(matches!(
            fixture.retirer.retire(&fixture.tracking, "151213-02.log").await,
            Err(RetireError::DestinationExists { .. })
        ));
        // The file stays tracked for a later retry.
        assert!(fixture.tracking.get("151213-02.log").await.unwrap().is_some());
    }
}
