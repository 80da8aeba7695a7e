use sha1::{Digest, Sha1};
use std::time::{SystemTime, UNIX_EPOCH};

/// Expected length of a content hash: 40 lowercase hex chars (SHA-1).
pub const CONTENT_HASH_LEN: usize = 40;

/// Placeholder sub-producer id for legacy lines that carry none.
pub const LEGACY_SUB_ID: &str = "____";

/// Severity pair that tags a record as a heartbeat rather than a log line.
const HEARTBEAT_TAG: (&str, &str) = ("0", "h");

/// One structured log record, as parsed from a single flat-file line.
///
/// Records exist only transiently between parse and batch commit; the sink
/// keys them by `content_hash` for deduplication.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub format_version: u8,
    /// Unix seconds at which the upstream relay received the record.
    pub receive_ts: f64,
    /// Unix seconds at which the original producer transmitted the record.
    pub transmit_ts: f64,
    pub source_id: String,
    pub sub_id: String,
    pub error_level: String,
    pub sub_level: String,
    /// Lowercase hex digest over the payload; the sink's dedup key.
    pub content_hash: String,
    /// Opaque structured text, stored verbatim.
    pub payload: String,
}

impl LogRecord {
    /// Heartbeats are merged newest-wins instead of being appended.
    pub fn is_heartbeat(&self) -> bool {
        (self.error_level.as_str(), self.sub_level.as_str()) == HEARTBEAT_TAG
    }

    /// Staging key for heartbeat merging.
    pub fn producer_key(&self) -> (String, String) {
        (self.source_id.clone(), self.sub_id.clone())
    }

    /// Build a heartbeat record announcing this shipper's own liveness.
    pub fn self_heartbeat(source_id: &str, sub_id: &str, payload: String) -> Self {
        let now = unix_now();
        Self {
            format_version: 1,
            receive_ts: now,
            transmit_ts: now,
            source_id: source_id.to_string(),
            sub_id: sub_id.to_string(),
            error_level: HEARTBEAT_TAG.0.to_string(),
            sub_level: HEARTBEAT_TAG.1.to_string(),
            content_hash: sha1_hex(payload.as_bytes()),
            payload,
        }
    }
}

/// Current wall-clock time as floating-point unix seconds.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Lowercase hex SHA-1 digest of `bytes`.
pub fn sha1_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();

    let mut out = String::with_capacity(CONTENT_HASH_LEN);
    for byte in digest {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}
