//! Mapping file loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::MappingConfig;
use crate::config::validation::{validate_mapping, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Parse and validate a mapping document.
pub fn parse_mapping(content: &str) -> Result<MappingConfig, ConfigError> {
    let mapping: MappingConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    validate_mapping(&mapping).map_err(ConfigError::Validation)?;

    Ok(mapping)
}

/// Load and validate the mapping from a TOML file.
pub fn load_mapping(path: &Path) -> Result<MappingConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mapping = parse_mapping(&content)?;

    tracing::debug!(
        path = %path.display(),
        routes = mapping.routes.len(),
        "Mapping loaded"
    );
    Ok(mapping)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_file() {
        let err = load_mapping(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_parse_error() {
        let err = parse_mapping("[[routes]\ndomain = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().starts_with("Parse error"));
    }

    #[test]
    fn test_validation_errors_are_joined() {
        let err = parse_mapping(
            r#"
            [[routes]]
            domain = "a.example.com"
            upstream = "ftp://a.internal"

            [[routes]]
            domain = "A.example.com"
            upstream = "http://a.internal"
            "#,
        )
        .unwrap_err();

        match &err {
            ConfigError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains(", "));
    }
}
