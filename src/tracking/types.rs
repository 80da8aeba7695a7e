#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("tracking database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("blocking task join: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{0:?} is already tracked")]
    AlreadyTracked(String),

    #[error("{0:?} is not tracked")]
    NotTracked(String),

    #[error("filename {0:?} does not follow the yymmdd-hh naming pattern")]
    BadFilename(String),

    #[error("cannot insert {filename:?} from a partial patch (missing {missing})")]
    IncompletePatch {
        filename: String,
        missing: &'static str,
    },
}

/// Durable per-file ingestion state, one row per filename.
///
/// Lexical filename order is the authoritative chronological order; the
/// day/hour keys derived from the name are diagnostics only (file copies can
/// produce duplicate modification times across distinct filenames).
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedFile {
    pub filename: String,
    pub day_key: String,
    pub hour_key: String,
    /// Last observed file-system modification time, unix seconds.
    pub modified_at: f64,
    /// Last observed file size in bytes.
    pub size: u64,
    /// Timestamp of the last reconcile cycle that saw this file.
    pub acquired_at: f64,
    /// Bytes ingested so far; non-decreasing.
    pub processed_offset: u64,
    /// False only for the single live (lexicographically greatest) file.
    pub historical: bool,
}

impl TrackedFile {
    /// Build a fresh entry for a newly discovered file, starting at offset 0.
    pub fn discovered(
        filename: &str,
        modified_at: f64,
        size: u64,
        acquired_at: f64,
        historical: bool,
    ) -> Result<Self, TrackingError> {
        let (day_key, hour_key) = derive_keys(filename)?;
        Ok(Self {
            filename: filename.to_string(),
            day_key,
            hour_key,
            modified_at,
            size,
            acquired_at,
            processed_offset: 0,
            historical,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.processed_offset >= self.size
    }
}

/// Partial update for a tracked file; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct FilePatch {
    pub filename: String,
    pub modified_at: Option<f64>,
    pub size: Option<u64>,
    pub acquired_at: Option<f64>,
    pub processed_offset: Option<u64>,
    pub historical: Option<bool>,
}

impl FilePatch {
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_string(),
            ..Self::default()
        }
    }

    pub fn modified_at(mut self, value: f64) -> Self {
        self.modified_at = Some(value);
        self
    }

    pub fn size(mut self, value: u64) -> Self {
        self.size = Some(value);
        self
    }

    pub fn acquired_at(mut self, value: f64) -> Self {
        self.acquired_at = Some(value);
        self
    }

    pub fn processed_offset(mut self, value: u64) -> Self {
        self.processed_offset = Some(value);
        self
    }

    pub fn historical(mut self, value: bool) -> Self {
        self.historical = Some(value);
        self
    }
}

impl TryFrom<FilePatch> for TrackedFile {
    type Error = TrackingError;

    /// A patch can seed a brand-new row only when it carries the full stat
    /// snapshot; the offset starts at zero unless given.
    fn try_from(patch: FilePatch) -> Result<Self, TrackingError> {
        let missing = |field: &'static str| TrackingError::IncompletePatch {
            filename: patch.filename.clone(),
            missing: field,
        };

        let modified_at = patch.modified_at.ok_or_else(|| missing("modified_at"))?;
        let size = patch.size.ok_or_else(|| missing("size"))?;
        let acquired_at = patch.acquired_at.ok_or_else(|| missing("acquired_at"))?;
        let historical = patch.historical.ok_or_else(|| missing("historical"))?;

        let mut file = TrackedFile::discovered(
            &patch.filename,
            modified_at,
            size,
            acquired_at,
            historical,
        )?;
        file.processed_offset = patch.processed_offset.unwrap_or(0);
        Ok(file)
    }
}

/// Day and hour keys from a `yymmdd-hh.log[.gz]` filename.
fn derive_keys(filename: &str) -> Result<(String, String), TrackingError> {
    let day = filename.get(0..6);
    let sep = filename.get(6..7);
    let hour = filename.get(7..9);
    match (day, sep, hour) {
        (Some(day), Some("-"), Some(hour))
            if day.bytes().all(|b| b.is_ascii_digit())
                && hour.bytes().all(|b| b.is_ascii_digit()) =>
        {
            Ok((day.to_string(), hour.to_string()))
        }
        _ => Err(TrackingError::BadFilename(filename.to_string())),
    }
}
