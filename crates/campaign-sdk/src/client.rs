//! Per-service HTTP client
//!
//! A [`ServiceClient`] binds one backend base URL to the shared credential
//! store. Every call returns a [`ResponseEnvelope`]; nothing is thrown across
//! this boundary.
//!
//! # Token refresh
//!
//! Only the primary auth service carries a [`RefreshCoordinator`]. When a
//! request that carried a bearer token comes back `401`, the client waits for
//! the coordinator and replays the original descriptor once with the new
//! token. A second `401` is surfaced to the caller.
//!
//! # Usage Examples
//!
//! ```rust,no_run
//! use campaign_sdk::{ClientBuilder, ResponseEnvelope};
//! use serde_json::Value;
//!
//! # async fn example() -> campaign_sdk::Result<()> {
//! let client = ClientBuilder::default()
//!     .base_url("http://localhost:8000/api/v1")
//!     .name("user")
//!     .with_token_refresh("/auth/refresh")
//!     .build()?;
//!
//! let campaigns: ResponseEnvelope<Value> = client.get("/campaigns").await;
//! if campaigns.is_success() {
//!     println!("{:?}", campaigns.data());
//! }
//! # Ok(())
//! # }
//! ```

use crate::auth::{
    HttpRefresher, LoggingNavigator, Navigator, RefreshCoordinator, RefreshError, RetryPolicy,
    TokenRefresher, TokenStore,
};
use crate::envelope::ResponseEnvelope;
use crate::error::{ApiError, ErrorKind, Result};
use crate::transport::{FormPart, HttpTransport, RequestDescriptor};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout in seconds for API requests
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Delay before the follow-up probe of an unhealthy service
pub const DEFAULT_HEALTH_RETRY_DELAY_SECS: u64 = 5;

/// Health endpoint probed on every service
pub const HEALTH_PATH: &str = "/health";

/// Last observed health of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub is_healthy: bool,
    /// `None` until the first probe completes
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Default for ServiceHealth {
    fn default() -> Self {
        Self {
            is_healthy: true,
            last_checked_at: None,
        }
    }
}

/// HTTP client for one backend service
#[derive(Debug, Clone)]
pub struct ServiceClient {
    name: String,
    transport: HttpTransport,
    refresh: Option<RefreshCoordinator>,
    retry_policy: RetryPolicy,
    health: Arc<RwLock<ServiceHealth>>,
    health_retry_delay: Duration,
    retry_probe_pending: Arc<AtomicBool>,
}

impl ServiceClient {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    pub fn token_store(&self) -> &Arc<TokenStore> {
        self.transport.tokens()
    }

    /// Present only on the primary auth service
    pub fn refresh_coordinator(&self) -> Option<&RefreshCoordinator> {
        self.refresh.as_ref()
    }

    pub fn is_primary_auth(&self) -> bool {
        self.refresh.is_some()
    }

    // ===== Request Methods =====

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ResponseEnvelope<T> {
        self.execute(RequestDescriptor::get(path)).await
    }

    /// GET with validated query parameters; see [`crate::query::encode_query`]
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> ResponseEnvelope<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        match RequestDescriptor::get(path).query(query) {
            Ok(request) => self.execute(request).await,
            Err(e) => rejected_locally(e),
        }
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> ResponseEnvelope<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        match RequestDescriptor::post(path).json(body) {
            Ok(request) => self.execute(request).await,
            Err(e) => rejected_locally(e),
        }
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> ResponseEnvelope<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        match RequestDescriptor::put(path).json(body) {
            Ok(request) => self.execute(request).await,
            Err(e) => rejected_locally(e),
        }
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> ResponseEnvelope<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        match RequestDescriptor::patch(path).json(body) {
            Ok(request) => self.execute(request).await,
            Err(e) => rejected_locally(e),
        }
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> ResponseEnvelope<T> {
        self.execute(RequestDescriptor::delete(path)).await
    }

    /// Multipart upload
    pub async fn upload<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: Vec<FormPart>,
    ) -> ResponseEnvelope<T> {
        self.execute(RequestDescriptor::post(path).multipart(parts)).await
    }

    /// Run a prepared descriptor and decode the payload into `T`
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> ResponseEnvelope<T> {
        self.dispatch(request).await.decode()
    }

    /// Run a prepared descriptor, refreshing and replaying on an expired session
    pub async fn dispatch(&self, request: RequestDescriptor) -> ResponseEnvelope<Value> {
        let mut budget = self.retry_policy.budget();

        loop {
            let attempt = self.transport.send(&request).await;

            let Some(coordinator) = &self.refresh else {
                return attempt.envelope;
            };
            let Some(stale) = attempt.bearer else {
                // Never logged in: not a session expiry
                return attempt.envelope;
            };
            if !attempt.envelope.is_unauthorized() || !request.refreshes_on_unauthorized() {
                return attempt.envelope;
            }
            if !budget.try_acquire() {
                debug!(service = %self.name, path = request.path(), "Unauthorized after replay");
                return attempt.envelope;
            }

            match coordinator.refresh(Some(&stale), request.cancellation()).await {
                Ok(_) => {
                    debug!(service = %self.name, path = request.path(), "Replaying request after refresh");
                }
                Err(RefreshError::Cancelled) => {
                    return ResponseEnvelope::failure(
                        ErrorKind::Cancelled,
                        "Request cancelled",
                        None,
                    );
                }
                Err(e) => {
                    return ResponseEnvelope::failure(
                        ErrorKind::SessionExpired,
                        format!("Session expired: {e}"),
                        attempt.envelope.status_code(),
                    );
                }
            }
        }
    }

    // ===== Health =====

    /// Probe `GET /health`; a 404 counts as healthy.
    ///
    /// An unhealthy result schedules one delayed follow-up probe. Health is
    /// advisory and never blocks requests.
    pub async fn check_health(&self) -> ServiceHealth {
        if !self.probe().await {
            warn!(
                service = %self.name,
                base_url = self.base_url(),
                "Service health check failed"
            );
            self.schedule_retry_probe();
        }
        self.health()
    }

    /// Last recorded health
    pub fn health(&self) -> ServiceHealth {
        *self.health.read()
    }

    async fn probe(&self) -> bool {
        let request = RequestDescriptor::get(HEALTH_PATH)
            .skip_auth()
            .without_refresh();
        let envelope = self.transport.send(&request).await.envelope;
        // Not every service implements the health endpoint
        let is_healthy = envelope.is_success() || envelope.status_code() == Some(404);

        *self.health.write() = ServiceHealth {
            is_healthy,
            last_checked_at: Some(Utc::now()),
        };
        is_healthy
    }

    fn schedule_retry_probe(&self) {
        if self.retry_probe_pending.swap(true, Ordering::AcqRel) {
            return;
        }

        let client = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(client.health_retry_delay).await;
            let is_healthy = client.probe().await;
            client.retry_probe_pending.store(false, Ordering::Release);
            if is_healthy {
                info!(service = %client.name, "Service recovered");
            } else {
                warn!(service = %client.name, "Service still unhealthy after retry probe");
            }
        });
    }
}

fn rejected_locally<T>(error: ApiError) -> ResponseEnvelope<T> {
    warn!(error = %error, "Request rejected before sending");
    ResponseEnvelope::failure(ErrorKind::Validation, error.to_string(), None)
}

enum RefreshSource {
    Path(String),
    Refresher(Arc<dyn TokenRefresher>),
}

/// Builder for constructing a ServiceClient with custom configuration
#[derive(Default)]
pub struct ClientBuilder {
    base_url: Option<String>,
    name: Option<String>,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
    token_store: Option<Arc<TokenStore>>,
    refresh: Option<RefreshSource>,
    navigator: Option<Arc<dyn Navigator>>,
    retry_policy: Option<RetryPolicy>,
    health_retry_delay: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL of the service
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Name used in logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Share a credential store; defaults to an in-memory one
    pub fn token_store(mut self, store: Arc<TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    /// Make this the primary auth service, refreshing via `POST {path}`
    pub fn with_token_refresh(mut self, path: impl Into<String>) -> Self {
        self.refresh = Some(RefreshSource::Path(path.into()));
        self
    }

    /// Make this the primary auth service with a custom refresher
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresh = Some(RefreshSource::Refresher(refresher));
        self
    }

    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn health_retry_delay(mut self, delay: Duration) -> Self {
        self.health_retry_delay = Some(delay);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ServiceClient> {
        let base_url = self.base_url.ok_or_else(|| ApiError::InvalidRequest {
            message: "base_url is required".into(),
        })?;

        let tokens = self
            .token_store
            .unwrap_or_else(|| Arc::new(TokenStore::in_memory()));
        let transport = HttpTransport::new(
            base_url,
            self.timeout
                .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            self.connect_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS)),
            Arc::clone(&tokens),
        )?;

        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(LoggingNavigator));
        let refresh = self.refresh.map(|source| {
            let refresher: Arc<dyn TokenRefresher> = match source {
                RefreshSource::Path(path) => Arc::new(HttpRefresher::new(transport.clone(), path)),
                RefreshSource::Refresher(refresher) => refresher,
            };
            RefreshCoordinator::new(Arc::clone(&tokens), refresher, navigator)
        });

        Ok(ServiceClient {
            name: self.name.unwrap_or_else(|| "service".to_string()),
            transport,
            refresh,
            retry_policy: self.retry_policy.unwrap_or_default(),
            health: Arc::new(RwLock::new(ServiceHealth::default())),
            health_retry_delay: self
                .health_retry_delay
                .unwrap_or(Duration::from_secs(DEFAULT_HEALTH_RETRY_DELAY_SECS)),
            retry_probe_pending: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::navigator::testing::RecordingNavigator;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn primary_client(
        mock_server: &MockServer,
        tokens: Arc<TokenStore>,
        navigator: Arc<RecordingNavigator>,
    ) -> ServiceClient {
        ClientBuilder::default()
            .base_url(mock_server.uri())
            .name("user")
            .token_store(tokens)
            .with_token_refresh("/auth/refresh")
            .navigator(navigator)
            .build()
            .unwrap()
    }

    fn logged_in() -> Arc<TokenStore> {
        let tokens = Arc::new(TokenStore::in_memory());
        tokens.set("access-1", Some("refresh-1"));
        tokens
    }

    async fn mount_refresh(mock_server: &MockServer, status: u16, body: Value, times: u64) {
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(times)
            .mount(mock_server)
            .await;
    }

    #[tokio::test]
    async fn test_replays_once_after_refresh() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .and(header("Authorization", "Bearer access-1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .and(header("Authorization", "Bearer access-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_refresh(&mock_server, 200, json!({"access_token": "access-2"}), 1).await;

        let tokens = logged_in();
        let navigator = Arc::new(RecordingNavigator::default());
        let client = primary_client(&mock_server, tokens.clone(), navigator.clone());

        let envelope: ResponseEnvelope<Value> = client.get("/campaigns").await;

        assert!(envelope.is_success());
        assert_eq!(envelope.data(), Some(&json!([{"id": 1}])));
        assert_eq!(tokens.access_token().as_deref(), Some("access-2"));
        assert_eq!(tokens.refresh_token().as_deref(), Some("refresh-1"));
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_surfaced() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "Nope"})))
            .expect(2)
            .mount(&mock_server)
            .await;
        mount_refresh(&mock_server, 200, json!({"access_token": "access-2"}), 1).await;

        let navigator = Arc::new(RecordingNavigator::default());
        let client = primary_client(&mock_server, logged_in(), navigator.clone());

        let envelope: ResponseEnvelope<Value> = client.get("/campaigns").await;

        assert!(!envelope.is_success());
        assert_eq!(envelope.status_code(), Some(401));
        assert_eq!(envelope.error(), Some("Nope"));
        assert_eq!(envelope.error_kind(), Some(ErrorKind::Unauthorized));
        assert_eq!(client.refresh_coordinator().unwrap().cycles(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_expires_session() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_refresh(&mock_server, 401, json!({"detail": "Refresh token expired"}), 1).await;

        let tokens = logged_in();
        let navigator = Arc::new(RecordingNavigator::default());
        let client = primary_client(&mock_server, tokens.clone(), navigator.clone());

        let envelope: ResponseEnvelope<Value> = client.get("/campaigns").await;

        assert!(!envelope.is_success());
        assert_eq!(envelope.status_code(), Some(401));
        assert_eq!(envelope.error_kind(), Some(ErrorKind::SessionExpired));
        assert!(tokens.get().is_none());
        assert_eq!(navigator.redirects().len(), 1);
    }

    #[tokio::test]
    async fn test_anonymous_unauthorized_never_refreshes() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&mock_server)
            .await;
        mount_refresh(&mock_server, 200, json!({"access_token": "unused"}), 0).await;

        let navigator = Arc::new(RecordingNavigator::default());
        let client = primary_client(
            &mock_server,
            Arc::new(TokenStore::in_memory()),
            navigator.clone(),
        );

        let envelope: ResponseEnvelope<Value> = client.get("/campaigns").await;

        assert_eq!(envelope.status_code(), Some(401));
        assert_eq!(envelope.error_kind(), Some(ErrorKind::Unauthorized));
        assert!(navigator.redirects().is_empty());
    }

    #[tokio::test]
    async fn test_without_refresh_surfaces_unauthorized() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/logout"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;
        mount_refresh(&mock_server, 200, json!({"access_token": "unused"}), 0).await;

        let client = primary_client(
            &mock_server,
            logged_in(),
            Arc::new(RecordingNavigator::default()),
        );
        let request = RequestDescriptor::post("/auth/logout").without_refresh();
        let envelope: ResponseEnvelope<Value> = client.execute(request).await;

        assert!(envelope.is_unauthorized());
    }

    #[tokio::test]
    async fn test_typed_decode() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Campaign {
            id: u64,
            name: String,
        }

        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/campaigns/1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "Launch"})),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/campaigns/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "two"})))
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::default()
            .base_url(mock_server.uri())
            .build()
            .unwrap();

        let campaign: ResponseEnvelope<Campaign> = client.get("/campaigns/1").await;
        assert_eq!(
            campaign.into_data(),
            Some(Campaign {
                id: 1,
                name: "Launch".into()
            })
        );

        let malformed: ResponseEnvelope<Campaign> = client.get("/campaigns/2").await;
        assert_eq!(malformed.error_kind(), Some(ErrorKind::InvalidResponse));
        assert_eq!(malformed.status_code(), Some(200));
    }

    #[tokio::test]
    async fn test_invalid_query_never_sent() {
        let mock_server = MockServer::start().await;
        let client = ClientBuilder::default()
            .base_url(mock_server.uri())
            .build()
            .unwrap();

        let envelope: ResponseEnvelope<Value> =
            client.get_with_query("/campaigns", &json!(["page", 2])).await;

        assert_eq!(envelope.error_kind(), Some(ErrorKind::Validation));
        assert!(envelope.status_code().is_none());
        assert!(mock_server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_404_counts_as_healthy() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::default()
            .base_url(mock_server.uri())
            .build()
            .unwrap();
        assert!(client.health().last_checked_at.is_none());

        let health = client.check_health().await;
        assert!(health.is_healthy);
        assert!(health.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn test_unhealthy_service_gets_one_retry_probe() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/campaigns"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let client = ClientBuilder::default()
            .base_url(mock_server.uri())
            .health_retry_delay(Duration::from_millis(50))
            .build()
            .unwrap();

        let health = client.check_health().await;
        assert!(!health.is_healthy);

        // An unhealthy service still serves requests
        let campaigns: ResponseEnvelope<Value> = client.get("/campaigns").await;
        assert!(campaigns.is_success());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(client.health().is_healthy);

        let probes = mock_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/health")
            .count();
        assert_eq!(probes, 2);
    }

    #[test]
    fn test_builder_requires_base_url() {
        let result = ClientBuilder::default().name("user").build();
        assert!(matches!(result, Err(ApiError::InvalidRequest { .. })));
    }

    #[test]
    fn test_builder_with_all_options() {
        let client = ClientBuilder::new()
            .base_url("http://localhost:8000/api/v1/")
            .name("user")
            .timeout(Duration::from_secs(5))
            .connect_timeout(Duration::from_secs(1))
            .with_token_refresh("/auth/refresh")
            .retry_policy(RetryPolicy::none())
            .health_retry_delay(Duration::from_secs(1))
            .build()
            .unwrap();

        assert_eq!(client.name(), "user");
        assert_eq!(client.base_url(), "http://localhost:8000/api/v1");
        assert!(client.is_primary_auth());
        assert!(client.health().is_healthy);
    }
}
