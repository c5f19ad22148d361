//! Client-visible authentication state
//!
//! [`SessionController`] drives login, registration and logout against the
//! primary auth service and publishes the resulting [`AuthSession`] through a
//! `tokio::sync::watch` channel. The session is never persisted; it is always
//! rebuilt from the stored credential plus a profile fetch.

use crate::auth::{InvalidationScope, Navigator, Subscription, TokenGrant, TokenStore};
use crate::client::ServiceClient;
use crate::envelope::ResponseEnvelope;
use crate::error::{ApiError, ErrorKind, Result};
use crate::transport::RequestDescriptor;
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Dashboard role of a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserRole {
    Creator,
    Agency,
    Brand,
    Admin,
    /// A role this client does not know about
    Unknown,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Creator => "creator",
            UserRole::Agency => "agency",
            UserRole::Brand => "brand",
            UserRole::Admin => "admin",
            UserRole::Unknown => "unknown",
        }
    }
}

impl From<String> for UserRole {
    fn from(role: String) -> Self {
        match role.to_ascii_lowercase().as_str() {
            "creator" => UserRole::Creator,
            "agency" => UserRole::Agency,
            "brand" => UserRole::Brand,
            "admin" => UserRole::Admin,
            _ => UserRole::Unknown,
        }
    }
}

impl From<UserRole> for String {
    fn from(role: UserRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile of the logged-in user
///
/// Only the fields the client acts on are typed; everything else the backend
/// sends is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default, alias = "fullName", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(de::Error::custom(format!("invalid user id: {other}"))),
    }
}

/// Authentication state as seen by the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthSession {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl AuthSession {
    fn authenticated(user: UserProfile) -> Self {
        Self::signed_in(Some(user))
    }

    /// Authenticated, possibly before the profile is known
    fn signed_in(user: Option<UserProfile>) -> Self {
        Self {
            user,
            is_authenticated: true,
            is_loading: false,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    pub email: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<UserRole>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("full_name", &self.full_name)
            .field("role", &self.role)
            .finish()
    }
}

/// Result of a successful sign-up; the account must be verified before login
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterOutcome {
    pub requires_verification: bool,
    pub email: String,
}

/// Endpoint paths on the primary auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthPaths {
    pub login_path: String,
    pub refresh_path: String,
    pub register_path: String,
    pub logout_path: String,
    pub profile_path: String,
    /// Tried when the profile path fails with a non-auth error
    pub profile_fallback_path: String,
}

impl Default for AuthPaths {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            register_path: "/auth/signup".to_string(),
            logout_path: "/auth/logout".to_string(),
            profile_path: "/auth/me".to_string(),
            profile_fallback_path: "/users/me".to_string(),
        }
    }
}

/// Pull the token grant and optional user out of a login payload.
///
/// Tokens may sit at the top level or under `tokens`.
fn parse_login(payload: Value) -> Result<(TokenGrant, Option<UserProfile>)> {
    let user = payload
        .get("user")
        .cloned()
        .and_then(|user| serde_json::from_value::<UserProfile>(user).ok());

    let grant = serde_json::from_value::<TokenGrant>(payload.clone()).or_else(|_| {
        let tokens = payload.get("tokens").cloned().unwrap_or(Value::Null);
        serde_json::from_value::<TokenGrant>(tokens)
    });

    match grant {
        Ok(grant) => Ok((grant, user)),
        Err(e) => Err(ApiError::InvalidResponse {
            message: format!("Login response carried no access token: {e}"),
        }),
    }
}

/// Fetch the profile from the primary path, falling back on a server error
async fn fetch_profile(client: &ServiceClient, paths: &AuthPaths) -> ResponseEnvelope<UserProfile> {
    let primary: ResponseEnvelope<UserProfile> = client.get(&paths.profile_path).await;
    let use_fallback = matches!(
        primary.error_kind(),
        Some(ErrorKind::Server | ErrorKind::InvalidResponse)
    ) && primary.status_code() != Some(403);
    if !use_fallback {
        return primary;
    }

    debug!(
        path = %paths.profile_fallback_path,
        error = ?primary.error(),
        "Profile endpoint failed, trying fallback"
    );
    client.get(&paths.profile_fallback_path).await
}

/// Owns the process-wide [`AuthSession`]
pub struct SessionController {
    client: Arc<ServiceClient>,
    navigator: Arc<dyn Navigator>,
    paths: AuthPaths,
    state: Arc<watch::Sender<AuthSession>>,
    _invalidation: Subscription,
}

impl fmt::Debug for SessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionController")
            .field("service", &self.client.name())
            .field("paths", &self.paths)
            .field("session", &*self.state.borrow())
            .finish()
    }
}

impl SessionController {
    /// Create a controller over the primary auth service client.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(client: Arc<ServiceClient>, navigator: Arc<dyn Navigator>, paths: AuthPaths) -> Self {
        let (state, _) = watch::channel(AuthSession::default());
        let state = Arc::new(state);

        let invalidation = {
            let state = Arc::clone(&state);
            let tokens = Arc::clone(client.token_store());
            client
                .token_store()
                .on_invalidate(InvalidationScope::Any, move || {
                    // A login may have landed after the clear
                    if tokens.access_token().is_some() {
                        return;
                    }
                    state.send_if_modified(|session| {
                        if !session.is_authenticated && session.user.is_none() {
                            return false;
                        }
                        info!("Session invalidated");
                        *session = AuthSession::default();
                        true
                    });
                })
        };

        Self {
            client,
            navigator,
            paths,
            state,
            _invalidation: invalidation,
        }
    }

    fn tokens(&self) -> &Arc<TokenStore> {
        self.client.token_store()
    }

    fn publish(&self, session: AuthSession) {
        self.state.send_replace(session);
    }

    fn set_loading(&self) {
        self.state.send_modify(|session| {
            session.is_loading = true;
            session.error = None;
        });
    }

    /// Restore the session from stored credentials
    pub async fn initialize(&self) -> AuthSession {
        if self.tokens().access_token().is_none() {
            debug!("No stored credentials");
            self.publish(AuthSession::default());
            return self.session();
        }

        self.set_loading();
        match self.fetch_profile().await.into_result() {
            Ok(Some(user)) => {
                info!(user_id = %user.id, "Session restored");
                self.publish(AuthSession::authenticated(user));
            }
            Ok(None) => {
                warn!("Profile response was empty");
                self.tokens().clear();
                self.publish(AuthSession::default());
            }
            Err(e) if e.is_retryable() || matches!(e, ApiError::Cancelled) => {
                // Keep the tokens for the next attempt
                warn!(error = %e, "Could not restore session");
                self.publish(AuthSession::failed(e.to_string()));
            }
            Err(e) => {
                warn!(error = %e, "Stored session is no longer valid");
                self.tokens().clear();
                self.publish(AuthSession::default());
            }
        }
        self.session()
    }

    async fn fetch_profile(&self) -> ResponseEnvelope<UserProfile> {
        fetch_profile(&self.client, &self.paths).await
    }

    /// Log in and publish the authenticated session before returning.
    ///
    /// When the login response carries no user, the session is published
    /// without one and the profile is filled in by a background fetch. A
    /// failing profile fetch never undoes the login.
    pub async fn login(&self, credentials: &LoginCredentials) -> Result<AuthSession> {
        self.set_loading();
        let (grant, user) = match self.request_login(credentials).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Login failed");
                self.publish(AuthSession::failed(e.to_string()));
                return Err(e);
            }
        };

        self.tokens()
            .set(&grant.access_token, grant.refresh_token.as_deref());
        let profile_pending = user.is_none();
        let session = AuthSession::signed_in(user);
        self.publish(session.clone());
        info!(
            user_id = session.user.as_ref().map(|u| u.id.as_str()),
            "Logged in"
        );

        if profile_pending {
            self.spawn_profile_fill(grant.access_token);
        }
        Ok(session)
    }

    async fn request_login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<(TokenGrant, Option<UserProfile>)> {
        let request = RequestDescriptor::post(self.paths.login_path.as_str())
            .json(credentials)?
            .skip_auth();
        let payload = self
            .client
            .dispatch(request)
            .await
            .into_result()?
            .ok_or_else(|| ApiError::InvalidResponse {
                message: "Login response was empty".to_string(),
            })?;
        parse_login(payload)
    }

    fn spawn_profile_fill(&self, access_token: String) {
        let client = Arc::clone(&self.client);
        let paths = self.paths.clone();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let user = match fetch_profile(&client, &paths).await.into_result() {
                Ok(Some(user)) => user,
                Ok(None) => {
                    debug!("Profile response after login was empty");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Could not load profile after login");
                    return;
                }
            };

            // Another login or a logout happened meanwhile
            if client.token_store().access_token().as_deref() != Some(access_token.as_str()) {
                return;
            }
            state.send_if_modified(|session| {
                if !session.is_authenticated || session.user.is_some() {
                    return false;
                }
                session.user = Some(user);
                true
            });
        });
    }

    /// Create an account; the user must verify their email before logging in
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterOutcome> {
        let descriptor = RequestDescriptor::post(self.paths.register_path.as_str())
            .json(request)?
            .skip_auth();
        self.client.dispatch(descriptor).await.into_result()?;

        info!(email = %request.email, "Account registered, verification pending");
        Ok(RegisterOutcome {
            requires_verification: true,
            email: request.email.clone(),
        })
    }

    /// End the session locally whatever the server says
    pub async fn logout(&self) {
        if let Some(credential) = self.tokens().get() {
            let body = match &credential.refresh_token {
                Some(refresh_token) => json!({ "refresh_token": refresh_token }),
                None => json!({}),
            };
            let request = RequestDescriptor::post(self.paths.logout_path.as_str())
                .json(&body)
                .map(RequestDescriptor::without_refresh);
            match request {
                Ok(request) => {
                    let envelope = self.client.dispatch(request).await;
                    if !envelope.is_success() {
                        debug!(error = ?envelope.error(), "Logout request failed");
                    }
                }
                Err(e) => debug!(error = %e, "Could not build logout request"),
            }
        }

        self.tokens().clear();
        self.publish(AuthSession::default());
        info!("Logged out");
        self.navigator.redirect_to_login("Logged out");
    }

    /// Re-fetch the profile of the current session
    pub async fn refresh_profile(&self) -> Result<UserProfile> {
        if self.tokens().access_token().is_none() {
            return Err(ApiError::Authentication {
                message: "Not logged in".to_string(),
            });
        }

        match self.fetch_profile().await.into_result()? {
            Some(user) => {
                self.publish(AuthSession::authenticated(user.clone()));
                Ok(user)
            }
            None => Err(ApiError::InvalidResponse {
                message: "Profile response was empty".to_string(),
            }),
        }
    }

    pub fn session(&self) -> AuthSession {
        self.state.borrow().clone()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<AuthSession> {
        self.state.subscribe()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated
    }
}
