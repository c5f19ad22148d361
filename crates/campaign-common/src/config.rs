//! Layered configuration loading
//!
//! Every configuration type is resolved the same way: compiled defaults,
//! then a TOML file, then prefixed environment variables (`PREFIX_SECTION__KEY`).

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The merged configuration could not be extracted
    #[error("Failed to parse configuration: {details}")]
    ParseError { details: String },

    /// An explicitly requested file does not exist
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// A value was syntactically valid but unusable
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Loader implemented by configuration types
pub trait ConfigLoader<T> {
    /// Load from the default file location (if present) and the environment
    fn load(path: Option<PathBuf>) -> Result<T, ConfigurationError>;

    /// Load from an explicit file; the file must exist
    fn load_from_file(path: &Path) -> Result<T, ConfigurationError>;

    /// Re-apply environment overrides on top of an existing value
    fn apply_env_overrides(config: &mut T, prefix: &str) -> Result<(), ConfigurationError>;
}

/// Build the standard defaults → file → environment stack.
///
/// Missing files are skipped silently; figment treats an absent TOML file as empty.
pub fn layered<T: Serialize>(defaults: &T, file: Option<&Path>, env_prefix: &str) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(defaults));
    if let Some(path) = file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(env_prefix).split("__"))
}

/// Extract a configuration value from a figment, mapping errors.
pub fn extract<T: DeserializeOwned>(figment: Figment) -> Result<T, ConfigurationError> {
    figment.extract().map_err(|e| ConfigurationError::ParseError {
        details: e.to_string(),
    })
}

/// Expand `~` in a user supplied path.
pub fn expand_path(path: &Path) -> PathBuf {
    match path.to_str() {
        Some(raw) => PathBuf::from(shellexpand::tilde(raw).into_owned()),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        name: String,
        retries: u32,
    }

    fn defaults() -> Sample {
        Sample {
            name: "default".to_string(),
            retries: 3,
        }
    }

    #[test]
    fn test_defaults_without_file() {
        let sample: Sample = extract(layered(&defaults(), None, "CAMPAIGN_COMMON_TEST_A_")).unwrap();
        assert_eq!(sample, defaults());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retries = 7").unwrap();

        let sample: Sample =
            extract(layered(&defaults(), Some(file.path()), "CAMPAIGN_COMMON_TEST_B_")).unwrap();
        assert_eq!(sample.retries, 7);
        assert_eq!(sample.name, "default");
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "retries = \"many\"").unwrap();

        let result: Result<Sample, _> =
            extract(layered(&defaults(), Some(file.path()), "CAMPAIGN_COMMON_TEST_C_"));
        assert!(matches!(result, Err(ConfigurationError::ParseError { .. })));
    }
}
