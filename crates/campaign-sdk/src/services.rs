//! The composition root
//!
//! [`ServiceRegistry`] builds one shared [`TokenStore`] and one
//! [`ServiceClient`] per backend from an [`SdkConfig`]. Only the user service
//! is the primary auth service and owns a refresh coordinator; the others see
//! rotated tokens through the shared store.

use crate::auth::{Navigator, TokenStore};
use crate::client::{ClientBuilder, ServiceClient, ServiceHealth};
use crate::config::SdkConfig;
use crate::error::{ApiError, Result};
use crate::session::SessionController;
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Backend services of the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    User,
    Campaign,
    Analytics,
    Payment,
    Integration,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 5] = [
        ServiceKind::User,
        ServiceKind::Campaign,
        ServiceKind::Analytics,
        ServiceKind::Payment,
        ServiceKind::Integration,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::User => "user",
            ServiceKind::Campaign => "campaign",
            ServiceKind::Analytics => "analytics",
            ServiceKind::Payment => "payment",
            ServiceKind::Integration => "integration",
        }
    }

    /// Whether this service issues and refreshes tokens
    pub fn is_primary_auth(&self) -> bool {
        matches!(self, ServiceKind::User)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ServiceKind {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self> {
        ServiceKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ApiError::InvalidRequest {
                message: format!(
                    "Unknown service '{s}', expected one of: user, campaign, analytics, payment, integration"
                ),
            })
    }
}

/// One client per backend, sharing a credential store
#[derive(Clone)]
pub struct ServiceRegistry {
    tokens: Arc<TokenStore>,
    navigator: Arc<dyn Navigator>,
    config: SdkConfig,
    user: Arc<ServiceClient>,
    campaign: Arc<ServiceClient>,
    analytics: Arc<ServiceClient>,
    payment: Arc<ServiceClient>,
    integration: Arc<ServiceClient>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("config", &self.config)
            .field("user", &self.user)
            .field("campaign", &self.campaign)
            .field("analytics", &self.analytics)
            .field("payment", &self.payment)
            .field("integration", &self.integration)
            .finish_non_exhaustive()
    }
}

impl ServiceRegistry {
    pub fn from_config(
        config: &SdkConfig,
        tokens: Arc<TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let build = |kind: ServiceKind| -> Result<Arc<ServiceClient>> {
            let mut builder = ClientBuilder::new()
                .base_url(config.services.base_url(kind))
                .name(kind.name())
                .timeout(config.timeout())
                .connect_timeout(config.connect_timeout())
                .health_retry_delay(config.health_retry_delay())
                .token_store(Arc::clone(&tokens))
                .navigator(Arc::clone(&navigator));
            if kind.is_primary_auth() {
                builder = builder.with_token_refresh(config.auth.refresh_path.as_str());
            }
            debug!(
                service = kind.name(),
                base_url = config.services.base_url(kind),
                "Building service client"
            );
            Ok(Arc::new(builder.build()?))
        };

        Ok(Self {
            user: build(ServiceKind::User)?,
            campaign: build(ServiceKind::Campaign)?,
            analytics: build(ServiceKind::Analytics)?,
            payment: build(ServiceKind::Payment)?,
            integration: build(ServiceKind::Integration)?,
            config: config.clone(),
            tokens,
            navigator,
        })
    }

    pub fn client(&self, kind: ServiceKind) -> &Arc<ServiceClient> {
        match kind {
            ServiceKind::User => &self.user,
            ServiceKind::Campaign => &self.campaign,
            ServiceKind::Analytics => &self.analytics,
            ServiceKind::Payment => &self.payment,
            ServiceKind::Integration => &self.integration,
        }
    }

    pub fn user(&self) -> &Arc<ServiceClient> {
        &self.user
    }

    pub fn campaign(&self) -> &Arc<ServiceClient> {
        &self.campaign
    }

    pub fn analytics(&self) -> &Arc<ServiceClient> {
        &self.analytics
    }

    pub fn payment(&self) -> &Arc<ServiceClient> {
        &self.payment
    }

    pub fn integration(&self) -> &Arc<ServiceClient> {
        &self.integration
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Probe every service concurrently
    pub async fn check_all_health(&self) -> Vec<(ServiceKind, ServiceHealth)> {
        let probes = ServiceKind::ALL.map(|kind| async move {
            (kind, self.client(kind).check_health().await)
        });
        let results = join_all(probes).await;

        let healthy = results.iter().filter(|(_, health)| health.is_healthy).count();
        info!(healthy, total = results.len(), "Health check complete");
        results
    }

    /// Session controller bound to the primary auth service.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn session_controller(&self) -> SessionController {
        SessionController::new(
            Arc::clone(&self.user),
            Arc::clone(&self.navigator),
            self.config.auth.clone(),
        )
    }

    /// Probe all services if the configuration asks for it
    pub async fn probe_on_start(&self) {
        if self.config.health.probe_on_start {
            self.check_all_health().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LoggingNavigator;
    use crate::envelope::ResponseEnvelope;
    use crate::error::ErrorKind;
    use serde_json::{json, Value};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(user: &str, others: &str) -> SdkConfig {
        let mut config = SdkConfig::default();
        config.services.user = user.to_string();
        config.services.campaign = others.to_string();
        config.services.analytics = others.to_string();
        config.services.payment = others.to_string();
        config.services.integration = others.to_string();
        config
    }

    #[test]
    fn test_service_kind_parsing() {
        assert_eq!("Campaign".parse::<ServiceKind>().unwrap(), ServiceKind::Campaign);
        assert!("billing".parse::<ServiceKind>().is_err());
        assert_eq!(ServiceKind::Payment.to_string(), "payment");
    }

    #[tokio::test]
    async fn test_only_user_service_refreshes() {
        let registry = ServiceRegistry::from_config(
            &SdkConfig::default(),
            Arc::new(TokenStore::in_memory()),
            Arc::new(LoggingNavigator),
        )
        .unwrap();

        for kind in ServiceKind::ALL {
            assert_eq!(registry.client(kind).is_primary_auth(), kind.is_primary_auth());
            assert_eq!(registry.client(kind).name(), kind.name());
        }
    }

    #[tokio::test]
    async fn test_clients_share_rotated_tokens() {
        let users = MockServer::start().await;
        let campaigns = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .and(header("Authorization", "Bearer access-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&campaigns)
            .await;

        let tokens = Arc::new(TokenStore::in_memory());
        let registry = ServiceRegistry::from_config(
            &config_for(&users.uri(), &campaigns.uri()),
            tokens.clone(),
            Arc::new(LoggingNavigator),
        )
        .unwrap();

        tokens.set("access-1", Some("refresh-1"));
        tokens.set("access-2", None);
        let envelope: ResponseEnvelope<Value> = registry.campaign().get("/campaigns").await;
        assert!(envelope.is_success());
    }

    #[tokio::test]
    async fn test_non_primary_unauthorized_is_returned_verbatim() {
        let users = MockServer::start().await;
        let campaigns = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&users)
            .await;
        Mock::given(method("GET"))
            .and(path("/analytics/summary"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Token expired"})))
            .expect(1)
            .mount(&campaigns)
            .await;

        let tokens = Arc::new(TokenStore::in_memory());
        tokens.set("access-1", Some("refresh-1"));
        let registry = ServiceRegistry::from_config(
            &config_for(&users.uri(), &campaigns.uri()),
            tokens.clone(),
            Arc::new(LoggingNavigator),
        )
        .unwrap();

        let envelope: ResponseEnvelope<Value> =
            registry.analytics().get("/analytics/summary").await;

        assert_eq!(envelope.status_code(), Some(401));
        assert_eq!(envelope.error_kind(), Some(ErrorKind::Unauthorized));
        // Another service's 401 does not end the session
        assert_eq!(tokens.access_token().as_deref(), Some("access-1"));
    }

    #[tokio::test]
    async fn test_check_all_health() {
        let users = MockServer::start().await;
        let others = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&users)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&others)
            .await;

        let registry = ServiceRegistry::from_config(
            &config_for(&users.uri(), &others.uri()),
            Arc::new(TokenStore::in_memory()),
            Arc::new(LoggingNavigator),
        )
        .unwrap();

        let results = registry.check_all_health().await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|(_, health)| health.is_healthy));
        assert_eq!(results[0].0, ServiceKind::User);
    }
}
