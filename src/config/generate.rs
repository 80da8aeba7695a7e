pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Logship polls a directory for sequentially-named flat-files (yymmdd-hh.log,
# optionally gzipped), ships their records into a deduplicated sink table,
# tracks per-file progress across restarts, and moves fully-ingested files
# into a done subdirectory.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml

# Directory watched for yymmdd-hh.log[.gz] files. The newest file is assumed
# to still be growing and is read incrementally; older files are read once,
# in full, then retired.
watch_dir: /var/log/xlog

# Subdirectory of watch_dir that fully-ingested files are moved into.
# Remove this line to disable retirement: files then stay where they are.
done_subdir: done

# How often to poll the watched directory.
interval: 6s

# This shipper's own identity, reported once per cycle on the heartbeat
# channel so operators can tell a stalled shipper from a quiet producer.
identity:
  source_id: shipper01
  # sub_id defaults to the legacy placeholder "____"
  # sub_id: east

sink:
  # Destination database holding the record and heartbeat tables.
  path: /var/lib/logship/sink.duckdb
  # Records are committed in transactions of at most this many rows.
  batch_size: 1000

# Per-file ingestion progress, kept next to the watched files by default.
# tracking:
#   path: /var/lib/logship/tracking.duckdb
"#
    .to_string()
}
