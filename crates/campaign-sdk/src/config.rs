//! SDK configuration
//!
//! Resolved from compiled defaults, then `config.toml` in the platform config
//! directory (or an explicit file), then `CAMPAIGN_*` environment variables,
//! e.g. `CAMPAIGN_SERVICES__USER=https://users.example.com/api/v1`.

use crate::services::ServiceKind;
use crate::session::AuthPaths;
use campaign_common::config::{expand_path, extract, layered};
use campaign_common::{ConfigLoader, ConfigurationError};
use etcetera::{choose_base_strategy, BaseStrategy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "CAMPAIGN_";

/// Directory name under the platform config and data directories
pub const APP_DIR: &str = "campaign-hub";

const CONFIG_FILE: &str = "config.toml";
const CREDENTIALS_FILE: &str = "credentials.json";

/// Top-level SDK configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Base URLs of the backend services
    #[serde(default)]
    pub services: ServicesConfig,

    /// HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Health probe settings
    #[serde(default)]
    pub health: HealthConfig,

    /// Endpoint paths of the primary auth service
    #[serde(default)]
    pub auth: AuthPaths,

    /// Credential storage
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Backend base URLs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Primary auth service; issues and refreshes tokens
    pub user: String,
    pub campaign: String,
    pub analytics: String,
    pub payment: String,
    pub integration: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            user: "http://localhost:8001/api/v1".to_string(),
            campaign: "http://localhost:8002/api/v1".to_string(),
            analytics: "http://localhost:8003/api/v1".to_string(),
            payment: "http://localhost:8004/api/v1".to_string(),
            integration: "http://localhost:8005/api/v1".to_string(),
        }
    }
}

impl ServicesConfig {
    pub fn base_url(&self, kind: ServiceKind) -> &str {
        match kind {
            ServiceKind::User => &self.user,
            ServiceKind::Campaign => &self.campaign,
            ServiceKind::Analytics => &self.analytics,
            ServiceKind::Payment => &self.payment,
            ServiceKind::Integration => &self.integration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Connect timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    crate::client::DEFAULT_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    crate::client::DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Delay before re-probing an unhealthy service
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Probe every service when the registry is created
    #[serde(default)]
    pub probe_on_start: bool,
}

fn default_retry_delay_secs() -> u64 {
    crate::client::DEFAULT_HEALTH_RETRY_DELAY_SECS
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay_secs(),
            probe_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Overrides the platform data directory for the credentials file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl SdkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect_timeout_secs)
    }

    pub fn health_retry_delay(&self) -> Duration {
        Duration::from_secs(self.health.retry_delay_secs)
    }

    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for kind in ServiceKind::ALL {
            let url = self.services.base_url(kind);
            Url::parse(url).map_err(|e| ConfigurationError::InvalidValue {
                field: format!("services.{}", kind.name()),
                reason: format!("'{url}' is not a valid URL: {e}"),
            })?;
        }

        if self.http.timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "http.timeout_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.http.connect_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "http.connect_timeout_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Platform config directory for the SDK
    pub fn config_dir() -> Result<PathBuf, ConfigurationError> {
        let strategy = choose_base_strategy().map_err(|e| ConfigurationError::InvalidValue {
            field: "config_dir".to_string(),
            reason: format!("Failed to determine base directories: {e}"),
        })?;
        Ok(strategy.config_dir().join(APP_DIR))
    }

    /// Default location of `config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigurationError> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Directory holding persisted credentials
    pub fn data_dir(&self) -> Result<PathBuf, ConfigurationError> {
        if let Some(dir) = &self.storage.data_dir {
            return Ok(expand_path(dir));
        }
        let strategy = choose_base_strategy().map_err(|e| ConfigurationError::InvalidValue {
            field: "storage.data_dir".to_string(),
            reason: format!("Failed to determine base directories: {e}"),
        })?;
        Ok(strategy.data_dir().join(APP_DIR))
    }

    /// Durable credential file used by the CLI
    pub fn credentials_path(&self) -> Result<PathBuf, ConfigurationError> {
        Ok(self.data_dir()?.join(CREDENTIALS_FILE))
    }

    /// Render the default configuration as TOML
    pub fn generate_example() -> Result<String, ConfigurationError> {
        let body = toml::to_string_pretty(&Self::default()).map_err(|e| {
            ConfigurationError::ParseError {
                details: e.to_string(),
            }
        })?;
        Ok(format!(
            "# Campaign Hub SDK configuration\n\
             # Every value can be overridden with {ENV_PREFIX}<SECTION>__<KEY>\n\n{body}"
        ))
    }

    fn resolve(file: Option<&Path>) -> Result<Self, ConfigurationError> {
        let config: Self = extract(layered(&Self::default(), file, ENV_PREFIX))?;
        config.validate()?;
        Ok(config)
    }
}

impl ConfigLoader<SdkConfig> for SdkConfig {
    fn load(path: Option<PathBuf>) -> Result<SdkConfig, ConfigurationError> {
        match path {
            Some(path) => Self::load_from_file(&path),
            None => {
                let default_path = Self::default_config_path().ok();
                debug!(path = ?default_path, "Loading SDK configuration");
                Self::resolve(default_path.as_deref())
            }
        }
    }

    fn load_from_file(path: &Path) -> Result<SdkConfig, ConfigurationError> {
        let path = expand_path(path);
        if !path.exists() {
            return Err(ConfigurationError::FileNotFound { path });
        }
        debug!(path = %path.display(), "Loading SDK configuration");
        Self::resolve(Some(&path))
    }

    fn apply_env_overrides(config: &mut SdkConfig, prefix: &str) -> Result<(), ConfigurationError> {
        *config = extract(layered(&*config, None, prefix))?;
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SdkConfig::default();
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.health_retry_delay(), Duration::from_secs(5));
        assert_eq!(config.auth.refresh_path, "/auth/refresh");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[services]
user = "https://users.example.com/api/v1"
campaign = "https://campaigns.example.com/api/v1"
analytics = "https://analytics.example.com"
payment = "https://payments.example.com"
integration = "https://integrations.example.com"

[http]
timeout_secs = 12
"#
        )
        .unwrap();

        let config = SdkConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.services.user, "https://users.example.com/api/v1");
        assert_eq!(config.http.timeout_secs, 12);
        assert_eq!(config.http.connect_timeout_secs, 10);
        assert_eq!(config.auth, AuthPaths::default());
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = SdkConfig::load_from_file(Path::new("/nonexistent/campaign.toml"));
        assert!(matches!(result, Err(ConfigurationError::FileNotFound { .. })));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[http]\ntimeout_secs = 0").unwrap();
        assert!(matches!(
            SdkConfig::load_from_file(file.path()),
            Err(ConfigurationError::InvalidValue { .. })
        ));

        let mut config = SdkConfig::default();
        config.services.payment = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { field, .. }) if field == "services.payment"
        ));
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var(
            "CAMPAIGN_SDK_TEST_ENV_SERVICES__ANALYTICS",
            "https://analytics.internal",
        );
        std::env::set_var("CAMPAIGN_SDK_TEST_ENV_HEALTH__PROBE_ON_START", "true");

        let mut config = SdkConfig::default();
        SdkConfig::apply_env_overrides(&mut config, "CAMPAIGN_SDK_TEST_ENV_").unwrap();

        assert_eq!(config.services.analytics, "https://analytics.internal");
        assert!(config.health.probe_on_start);
        assert_eq!(config.services.user, ServicesConfig::default().user);

        std::env::remove_var("CAMPAIGN_SDK_TEST_ENV_SERVICES__ANALYTICS");
        std::env::remove_var("CAMPAIGN_SDK_TEST_ENV_HEALTH__PROBE_ON_START");
    }

    #[test]
    fn test_generate_example_parses_back() {
        let example = SdkConfig::generate_example().unwrap();
        assert!(example.contains("[services]"));
        let parsed: SdkConfig = toml::from_str(&example).unwrap();
        assert_eq!(parsed, SdkConfig::default());
    }

    #[test]
    fn test_credentials_path_honours_override() {
        let dir = tempfile::tempdir().unwrap();
        let config = SdkConfig {
            storage: StorageConfig {
                data_dir: Some(dir.path().to_path_buf()),
            },
            ..Default::default()
        };
        assert_eq!(
            config.credentials_path().unwrap(),
            dir.path().join("credentials.json")
        );
    }
}
