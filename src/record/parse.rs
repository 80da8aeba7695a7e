use super::types::{LogRecord, LEGACY_SUB_ID};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported format version {0}")]
    BadVersion(u8),

    #[error("expected {expected} {delimiter}-delimited fields, found {found}")]
    FieldCount {
        expected: usize,
        found: usize,
        delimiter: &'static str,
    },

    #[error("redundant sub-level preamble variant is not accepted")]
    RedundantSubLevel,

    #[error("bad {field} timestamp: {value:?}")]
    BadTimestamp { field: &'static str, value: String },
}

/// Outcome of parsing one raw line. Callers branch on the tag; parse
/// failures come back as `Err` and the line is dropped, not the batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Record(LogRecord),
    Comment(String),
}

const COMMENT_MARKER: char = '#';

/// Fields carried by a version-1 (tab-delimited) line after the preamble.
const V1_FIELDS: usize = 8;
/// Fields carried by a legacy (pipe-delimited) line; no explicit sub-id.
const LEGACY_FIELDS: usize = 7;

/// Parse one raw log line into a structured record.
///
/// A `"<digit><tab>"` prefix selects the versioned format; only version 1 is
/// known. Anything else falls back to the legacy pipe-delimited layout with
/// the sub-id defaulted. Lines starting with the comment marker are
/// surfaced as `Parsed::Comment` so the caller can log them without
/// ingesting anything.
pub fn parse_line(line: &str) -> Result<Parsed, ParseError> {
    if line.starts_with(COMMENT_MARKER) {
        return Ok(Parsed::Comment(line.to_string()));
    }

    let mut chars = line.chars();
    let versioned = match (chars.next(), chars.next()) {
        (Some(first), Some('\t')) if first.is_ascii_digit() => {
            Some(first.to_digit(10).unwrap_or(0) as u8)
        }
        _ => None,
    };

    match versioned {
        Some(1) => parse_v1(line),
        Some(version) => Err(ParseError::BadVersion(version)),
        None => parse_legacy(line),
    }
}

fn parse_v1(line: &str) -> Result<Parsed, ParseError> {
    // An early upstream producer emitted a redundant copy of the sub-level
    // in the preamble, giving nine tab-separated fields. Rejected as
    // malformed rather than silently repaired.
    if line.matches('\t').count() == V1_FIELDS + 1 {
        return Err(ParseError::RedundantSubLevel);
    }

    let rest = &line[2..];
    let fields: Vec<&str> = rest.splitn(V1_FIELDS, '\t').collect();
    if fields.len() != V1_FIELDS {
        return Err(ParseError::FieldCount {
            expected: V1_FIELDS,
            found: fields.len(),
            delimiter: "tab",
        });
    }

    let record = LogRecord {
        format_version: 1,
        receive_ts: parse_ts("receive", fields[0])?,
        transmit_ts: parse_ts("transmit", fields[1])?,
        source_id: fields[2].to_string(),
        sub_id: fields[3].to_string(),
        error_level: fields[4].to_string(),
        sub_level: fields[5].to_string(),
        content_hash: fields[6].to_ascii_lowercase(),
        payload: fields[7].to_string(),
    };
    Ok(Parsed::Record(record))
}

fn parse_legacy(line: &str) -> Result<Parsed, ParseError> {
    let fields: Vec<&str> = line.splitn(LEGACY_FIELDS, '|').collect();
    if fields.len() != LEGACY_FIELDS {
        return Err(ParseError::FieldCount {
            expected: LEGACY_FIELDS,
            found: fields.len(),
            delimiter: "pipe",
        });
    }

    let record = LogRecord {
        format_version: 0,
        receive_ts: parse_ts("receive", fields[0])?,
        transmit_ts: parse_ts("transmit", fields[1])?,
        source_id: fields[2].to_string(),
        sub_id: LEGACY_SUB_ID.to_string(),
        error_level: fields[3].to_string(),
        sub_level: fields[4].to_string(),
        content_hash: fields[5].to_ascii_lowercase(),
        payload: fields[6].to_string(),
    };
    Ok(Parsed::Record(record))
}

fn parse_ts(field: &'static str, value: &str) -> Result<f64, ParseError> {
    value.parse::<f64>().map_err(|_| ParseError::BadTimestamp {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    fn v1_line() -> String {
        format!(
            "1\t1449937065.5425\t1429603009.0\tnx01\t____\t0\ta\t{}\t{{\"k\": 1}}",
            HASH
        )
    }

    fn expect_record(parsed: Parsed) -> LogRecord {
        match parsed {
            Parsed::Record(record) => record,
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_v1_line() {
        let record = expect_record(parse_line(&v1_line()).unwrap());
        assert_eq!(record.format_version, 1);
        assert_eq!(record.receive_ts, 1449937065.5425);
        assert_eq!(record.transmit_ts, 1429603009.0);
        assert_eq!(record.source_id, "nx01");
        assert_eq!(record.sub_id, "____");
        assert_eq!(record.error_level, "0");
        assert_eq!(record.sub_level, "a");
        assert_eq!(record.content_hash, HASH);
        assert_eq!(record.payload, "{\"k\": 1}");
    }

    #[test]
    fn test_parse_legacy_line() {
        let line = format!("1429603009.0|1449937065.5|nx01|0|a|{}|k=v", HASH);
        let record = expect_record(parse_line(&line).unwrap());
        assert_eq!(record.format_version, 0);
        assert_eq!(record.receive_ts, 1429603009.0);
        assert_eq!(record.transmit_ts, 1449937065.5);
        assert_eq!(record.source_id, "nx01");
        assert_eq!(record.sub_id, LEGACY_SUB_ID);
        assert_eq!(record.payload, "k=v");
    }

    #[test]
    fn test_legacy_payload_keeps_pipes() {
        let line = format!("1.0|2.0|nx01|0|a|{}|k=v|extra|stuff", HASH);
        let record = expect_record(parse_line(&line).unwrap());
        assert_eq!(record.payload, "k=v|extra|stuff");
    }

    #[test]
    fn test_comment_line() {
        match parse_line("#> some preamble").unwrap() {
            Parsed::Comment(text) => assert_eq!(text, "#> some preamble"),
            other => panic!("expected comment, got {:?}", other),
        }
    }

    #[test]
    fn test_redundant_sub_level_rejected() {
        let line = format!(
            "1\t1449937065.5\t1429603009.0\tnx01\t____\ta\t0\ta\t{}\tpayload",
            HASH
        );
        assert!(matches!(
            parse_line(&line),
            Err(ParseError::RedundantSubLevel)
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let line = format!("2\t1.0\t2.0\tnx01\t____\t0\ta\t{}\tpayload", HASH);
        assert!(matches!(parse_line(&line), Err(ParseError::BadVersion(2))));
    }

    #[test]
    fn test_v1_field_count() {
        let line = "1\t1.0\t2.0\tnx01\t____";
        assert!(matches!(
            parse_line(line),
            Err(ParseError::FieldCount { delimiter: "tab", .. })
        ));
    }

    #[test]
    fn test_legacy_field_count() {
        assert!(matches!(
            parse_line("not a log line"),
            Err(ParseError::FieldCount { delimiter: "pipe", .. })
        ));
    }

    #[test]
    fn test_bad_timestamp_is_hard_error() {
        let line = format!("1\tnot-a-number\t1429603009.0\tnx01\t____\t0\ta\t{}\tp", HASH);
        assert!(matches!(
            parse_line(&line),
            Err(ParseError::BadTimestamp { field: "receive", .. })
        ));
    }

    #[test]
    fn test_hash_normalized_to_lowercase() {
        let line = format!(
            "1\t1.0\t2.0\tnx01\t____\t0\ta\t{}\tp",
            HASH.to_ascii_uppercase()
        );
        let record = expect_record(parse_line(&line).unwrap());
        assert_eq!(record.content_hash, HASH);
    }

    #[test]
    fn test_heartbeat_detection() {
        let line = format!("1\t1.0\t2.0\tnx01\t____\t0\th\t{}\t{{}}", HASH);
        let record = expect_record(parse_line(&line).unwrap());
        assert!(record.is_heartbeat());
    }
}
