pub mod parse;
pub mod types;

pub use parse::{parse_line, ParseError, Parsed};
pub use types::{sha1_hex, unix_now, LogRecord, CONTENT_HASH_LEN, LEGACY_SUB_ID};
