//! Per-invocation wiring of configuration, credentials and service clients

use crate::error::Result;
use campaign_sdk::{
    ConfigLoader, FileStorage, MemoryStorage, Navigator, SdkConfig, ServiceRegistry, TokenStore,
};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Tells the user to sign in again; a terminal has no login page to open
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn redirect_to_login(&self, reason: &str) {
        eprintln!(
            "{} {}. Run {} to sign in.",
            style("!").yellow().bold(),
            reason,
            style("campaign login").cyan()
        );
    }
}

pub struct CliContext {
    pub config: SdkConfig,
    pub registry: ServiceRegistry,
}

impl CliContext {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config = SdkConfig::load(config_path)?;
        config.validate()?;
        Self::from_config(config)
    }

    pub fn from_config(config: SdkConfig) -> Result<Self> {
        let credentials = config.credentials_path()?;
        debug!(path = %credentials.display(), "Using credential file");

        // The process is the session; the file outlives it
        let tokens = Arc::new(TokenStore::new(
            Arc::new(FileStorage::new(credentials)),
            Arc::new(MemoryStorage::session()),
        ));
        let registry = ServiceRegistry::from_config(&config, tokens, Arc::new(TerminalNavigator))?;

        Ok(Self { config, registry })
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        self.registry.token_store()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_context_persists_tokens_to_data_dir() {
        let dir = TempDir::new().unwrap();
        let mut config = SdkConfig::default();
        config.storage.data_dir = Some(dir.path().to_path_buf());

        let context = CliContext::from_config(config.clone()).unwrap();
        context.tokens().set("access-1", Some("refresh-1"));

        // A later invocation sees the same credentials
        let next = CliContext::from_config(config).unwrap();
        assert_eq!(next.tokens().access_token().as_deref(), Some("access-1"));
        assert!(dir.path().join("credentials.json").exists());
    }
}
