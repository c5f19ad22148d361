//! # Campaign Hub SDK
//!
//! Authenticated client for the Campaign Hub dashboard backends.
//!
//! The SDK is assembled from a few layers:
//!
//! - [`TokenStore`] keeps the access/refresh token pair in a durable and a
//!   session-scoped backend and broadcasts logouts to sibling contexts
//! - [`HttpTransport`] performs one call and normalizes every outcome into a
//!   [`ResponseEnvelope`]
//! - [`RefreshCoordinator`] keeps at most one token refresh in flight
//! - [`ServiceClient`] binds a backend base URL to the above and replays a
//!   request once after a successful refresh
//! - [`SessionController`] owns the user-visible [`AuthSession`]
//!
//! [`ServiceRegistry`] wires all of it together from an [`SdkConfig`].
//!
//! ```rust,no_run
//! use campaign_sdk::{
//!     ConfigLoader, LoggingNavigator, LoginCredentials, SdkConfig, ServiceRegistry, TokenStore,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> campaign_sdk::Result<()> {
//! let config = SdkConfig::load(None)?;
//! let registry = ServiceRegistry::from_config(
//!     &config,
//!     Arc::new(TokenStore::in_memory()),
//!     Arc::new(LoggingNavigator),
//! )?;
//!
//! let session = registry.session_controller();
//! session
//!     .login(&LoginCredentials::new("ana@example.com", "secret"))
//!     .await?;
//!
//! let campaigns: campaign_sdk::ResponseEnvelope<serde_json::Value> =
//!     registry.campaign().get("/campaigns").await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod query;
pub mod services;
pub mod session;
pub mod transport;

pub use auth::{
    Credential, FileStorage, InvalidationScope, KeyValueStorage, LoggingNavigator, MemoryStorage,
    Navigator, RefreshCoordinator, RefreshError, RetryPolicy, StorageBus, Subscription,
    TokenGrant, TokenRefresher, TokenStore,
};
pub use campaign_common::ConfigLoader;
pub use client::{ClientBuilder, ServiceClient, ServiceHealth};
pub use config::SdkConfig;
pub use envelope::ResponseEnvelope;
pub use error::{ApiError, ErrorKind, Result};
pub use query::{encode_query, EncodedQuery};
pub use services::{ServiceKind, ServiceRegistry};
pub use session::{
    AuthPaths, AuthSession, LoginCredentials, RegisterOutcome, RegisterRequest,
    SessionController, UserProfile, UserRole,
};
pub use transport::{FormPart, HttpTransport, RequestBody, RequestDescriptor};
