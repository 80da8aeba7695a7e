use regex::Regex;

/// Matcher for the watched filename pattern: six digits, hyphen, two digits,
/// a `.log` suffix (case-insensitive), optionally gzip-compressed.
///
/// The name encodes a local date-hour, which makes lexical filename order
/// the chronological order without consulting file-system timestamps.
pub struct FilePattern {
    re: Regex,
}

impl FilePattern {
    pub fn new() -> Self {
        Self {
            re: Regex::new(r"(?i)^\d{6}-\d{2}\.log(\.gz)?$").unwrap(),
        }
    }

    pub fn matches(&self, filename: &str) -> bool {
        self.re.is_match(filename)
    }
}

impl Default for FilePattern {
    fn default() -> Self {
        Self::new()
    }
}

/// Compressed variants are always read whole, never seeked.
pub fn is_compressed(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".gz")
}
