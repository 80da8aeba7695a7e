use super::types::Config;
use super::{expand_env_vars, expand_tilde};
use regex::Regex;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    // Expand environment variables before parsing so unset variables can be
    // reported as such rather than as YAML type errors.
    let yaml_string = expand_env_vars(&yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        ))
    })?;

    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut unexpanded: Vec<String> = re
        .captures_iter(yaml_string)
        .map(|cap| cap.get(1).unwrap().as_str().to_string())
        .collect();

    if unexpanded.is_empty() {
        return Ok(());
    }

    unexpanded.sort();
    unexpanded.dedup();
    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded.join(", ")
    )))
}

fn expand_paths(config: &mut Config) {
    config.watch_dir = expand_tilde(&config.watch_dir);
    config.sink.path = expand_tilde(&config.sink.path);
    if let Some(path) = &config.tracking.path {
        config.tracking.path = Some(expand_tilde(path));
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if config.watch_dir.as_os_str().is_empty() {
        errors.push("watch_dir must not be empty".to_string());
    }

    if config.interval.is_zero() {
        errors.push("interval must be greater than zero".to_string());
    }

    if config.identity.source_id.is_empty() {
        errors.push("identity.source_id must not be empty".to_string());
    }

    if config.sink.path.as_os_str().is_empty() {
        errors.push("sink.path must not be empty".to_string());
    }

    if config.sink.batch_size == 0 {
        errors.push("sink.batch_size must be at least 1".to_string());
    }

    if let Some(subdir) = &config.done_subdir {
        if subdir.is_empty() {
            errors.push("done_subdir must not be empty when set".to_string());
        } else if subdir.contains('/') || subdir.contains('\\') {
            errors.push(format!(
                "done_subdir must be a bare directory name, got {:?}",
                subdir
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load(yaml: &str) -> Result<Config, ConfigError> {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file.flush().unwrap();
        load_config(file.path())
    }

    const MINIMAL: &str = r#"
watch_dir: /var/log/xlog
identity:
  source_id: shipper01
sink:
  path: /var/lib/logship/sink.duckdb
"#;

    #[test]
    fn test_minimal_config_with_defaults() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.interval.as_secs(), 6);
        assert_eq!(config.sink.batch_size, 1000);
        assert_eq!(config.identity.sub_id, "____");
        assert!(config.done_subdir.is_none());
        assert!(config.done_dir().is_none());
    }

    #[test]
    fn test_full_config() {
        let config = load(
            r#"
watch_dir: /var/log/xlog
done_subdir: done
interval: 30s
identity:
  source_id: shipper01
  sub_id: east
sink:
  path: /var/lib/logship/sink.duckdb
  batch_size: 500
tracking:
  path: /var/lib/logship/tracking.duckdb
"#,
        )
        .unwrap();
        assert_eq!(config.interval.as_secs(), 30);
        assert_eq!(config.sink.batch_size, 500);
        assert_eq!(config.identity.sub_id, "east");
        assert_eq!(
            config.tracking_path(),
            std::path::PathBuf::from("/var/lib/logship/tracking.duckdb")
        );
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let err = load(
            r#"
watch_dir: /var/log/xlog
interval: 0s
done_subdir: nested/dir
identity:
  source_id: ""
sink:
  path: /var/lib/logship/sink.duckdb
  batch_size: 0
"#,
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("interval"));
        assert!(message.contains("source_id"));
        assert!(message.contains("batch_size"));
        assert!(message.contains("done_subdir"));
    }

    #[test]
    fn test_unset_env_var_is_reported() {
        let err = load(
            r#"
watch_dir: $env{LOGSHIP_UNSET_WATCH_DIR}
identity:
  source_id: shipper01
sink:
  path: /var/lib/logship/sink.duckdb
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("LOGSHIP_UNSET_WATCH_DIR"));
    }
}
