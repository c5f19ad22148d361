//! Authentication module for the Campaign Hub SDK
//!
//! This module provides:
//! - Credential storage across durable and session-scoped backends
//! - Cross-context invalidation when another session logs out
//! - Single-flight token refresh with queued waiters
//! - The login-surface seam used when a session ends

pub mod navigator;
pub mod refresh;
pub mod storage;
pub mod token_store;
pub mod types;

// Re-export commonly used types
pub use navigator::{LoggingNavigator, Navigator};
pub use refresh::{
    HttpRefresher, RefreshCoordinator, RefreshError, RetryBudget, RetryPolicy, TokenRefresher,
};
pub use storage::{FileStorage, KeyValueStorage, MemoryStorage, StorageError, StorageKind};
pub use token_store::{
    InvalidationScope, StorageBus, StorageEvent, Subscription, TokenStore, ACCESS_TOKEN_ALIAS,
    ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
pub use types::{Credential, TokenGrant};
