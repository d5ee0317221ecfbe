//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into a [`GovernorConfig`], and run
//! validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message

use std::path::Path;

use super::validation::{self, ConfigError};
use super::GovernorConfig;

/// Load a [`GovernorConfig`] from a TOML file.
///
/// # Errors
///
/// - `ConfigError::Io` if the file cannot be read.
/// - `ConfigError::Parse` if the TOML is malformed.
/// - `ConfigError::Validation` if semantic constraints are violated.
///
/// # Example
///
/// ```rust,ignore
/// use molt_governor::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("governor.toml"))?;
/// println!("engagement window: {} min", config.engagement.window_minutes);
/// ```
pub fn load_from_file(path: &Path) -> Result<GovernorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load a [`GovernorConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Errors
///
/// - `ConfigError::Parse` if the TOML is malformed.
/// - `ConfigError::Validation` if semantic constraints are violated.
pub fn load_from_str(content: &str, source_name: &str) -> Result<GovernorConfig, ConfigError> {
    let config: GovernorConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    validation::validate(&config).map_err(|errors| {
        ConfigError::Validation(
            errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    })?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r###"
[engagement]
window_minutes = 45
moderate_threshold = 2
high_threshold = 4

[gates]
synthesis_cooldown_hours = 4.0
confidence_threshold = "medium"

[rate_limit]
post_cooldown_secs = 900

[rate_limit.adaptive]
enabled = true
high_factor = 2.0

[self_modify]
min_cooldown_hours = 8.0
required_sections = ["## Mission"]

[observability]
log_format = "json"
"###;

    #[test]
    fn test_load_from_str_valid_toml_succeeds() {
        let config = load_from_str(VALID_TOML, "test").expect("test: valid config");
        assert_eq!(config.engagement.window_minutes, 45);
        assert!(config.rate_limit.adaptive.enabled);
        assert_eq!(config.self_modify.required_sections, vec!["## Mission"]);
        assert_eq!(config.observability.log_format, crate::config::LogFormat::Json);
    }

    #[test]
    fn test_load_from_str_invalid_toml_returns_parse_error() {
        let result = load_from_str("not valid toml [[[", "bad.toml");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_from_str_inverted_thresholds_returns_validation_error() {
        let toml = r#"
[engagement]
moderate_threshold = 5
high_threshold = 2
"#;
        let err = load_from_str(toml, "inverted.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("engagement.moderate_threshold"));
    }

    #[test]
    fn test_load_from_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("test: tempfile");
        file.write_all(VALID_TOML.as_bytes()).expect("test: write");
        let config = load_from_file(file.path()).expect("test: load");
        assert_eq!(config.rate_limit.post_cooldown_secs, 900);
    }

    #[test]
    fn test_load_from_file_missing_returns_io_error() {
        let result = load_from_file(Path::new("/definitely/not/here/governor.toml"));
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("governor.toml"));
    }
}
