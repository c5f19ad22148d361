//! Credential storage across a durable and a session-scoped backend
//!
//! Tokens are written under two alias keys (`auth_token` and `access_token`)
//! in both backends so that readers using either naming convention succeed.
//! Reads prefer the durable backend and fall back to the session one.
//!
//! A [`TokenStore`] represents one execution context. Sibling contexts created
//! with [`TokenStore::attach_context`] share the durable backend and a
//! [`StorageBus`]; a clear in one context is observed by subscribers in the
//! others, which is how a logout propagates between open sessions.

use super::storage::{KeyValueStorage, MemoryStorage};
use super::types::Credential;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Primary access token key
pub const ACCESS_TOKEN_KEY: &str = "auth_token";
/// Legacy alias of the access token key
pub const ACCESS_TOKEN_ALIAS: &str = "access_token";
/// Refresh token key
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

const ACCESS_KEYS: [&str; 2] = [ACCESS_TOKEN_KEY, ACCESS_TOKEN_ALIAS];
const ALL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, ACCESS_TOKEN_ALIAS, REFRESH_TOKEN_KEY];

const BUS_CAPACITY: usize = 64;

/// A change to the durable medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Context that performed the write
    pub origin: Uuid,
    pub key: String,
    /// `None` when the key was removed
    pub new_value: Option<String>,
}

/// Change notifications for a durable medium shared by several contexts
#[derive(Debug, Clone)]
pub struct StorageBus {
    sender: broadcast::Sender<StorageEvent>,
}

impl StorageBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: StorageEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }
}

impl Default for StorageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Which invalidations a subscriber is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Only clears performed by other contexts
    External,
    /// Clears from any context, including this one
    Any,
}

/// Handle for an invalidation subscription; dropping it unsubscribes
#[derive(Debug)]
pub struct Subscription {
    handle: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Reads and writes credentials for one execution context
#[derive(Debug)]
pub struct TokenStore {
    context_id: Uuid,
    durable: Arc<dyn KeyValueStorage>,
    session: Arc<dyn KeyValueStorage>,
    bus: StorageBus,
}

impl TokenStore {
    /// Create a store over the given backends with a fresh bus
    pub fn new(durable: Arc<dyn KeyValueStorage>, session: Arc<dyn KeyValueStorage>) -> Self {
        Self::with_bus(durable, session, StorageBus::new())
    }

    /// Create a store joining an existing bus
    pub fn with_bus(
        durable: Arc<dyn KeyValueStorage>,
        session: Arc<dyn KeyValueStorage>,
        bus: StorageBus,
    ) -> Self {
        Self {
            context_id: Uuid::new_v4(),
            durable,
            session,
            bus,
        }
    }

    /// Store with in-memory backends for both lifetimes
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStorage::durable()),
            Arc::new(MemoryStorage::session()),
        )
    }

    /// A sibling context: same durable backend and bus, its own session backend
    pub fn attach_context(&self) -> Self {
        Self::with_bus(
            Arc::clone(&self.durable),
            Arc::new(MemoryStorage::session()),
            self.bus.clone(),
        )
    }

    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Current credential, or `None` when no access token is stored.
    ///
    /// Never fails: storage errors are logged and read as absence.
    pub fn get(&self) -> Option<Credential> {
        let access_token = self.read_first(&ACCESS_KEYS)?;
        let refresh_token = self.read_first(&[REFRESH_TOKEN_KEY]);
        Some(Credential {
            access_token,
            refresh_token,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.read_first(&ACCESS_KEYS)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read_first(&[REFRESH_TOKEN_KEY])
    }

    /// Write the access token (and refresh token, if given) to both backends.
    ///
    /// A `None` refresh token leaves the stored one in place.
    pub fn set(&self, access_token: &str, refresh_token: Option<&str>) {
        for backend in self.backends() {
            for key in ACCESS_KEYS {
                self.write(backend, key, access_token);
            }
            if let Some(refresh_token) = refresh_token {
                self.write(backend, REFRESH_TOKEN_KEY, refresh_token);
            }
        }
        self.publish(ACCESS_TOKEN_KEY, Some(access_token));
        debug!(context = %self.context_id, "Stored credentials");
    }

    /// Remove every token slot from both backends
    pub fn clear(&self) {
        for backend in self.backends() {
            purge(backend.as_ref());
        }
        self.publish(ACCESS_TOKEN_KEY, None);
        debug!(context = %self.context_id, "Cleared credentials");
    }

    /// Fire `callback` when another context clears the access token.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_external_invalidate<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_invalidate(InvalidationScope::External, callback)
    }

    /// Fire `callback` when the durable access token slot is cleared.
    ///
    /// An external clear also drops this context's session copies, so the
    /// store reads as logged out by the time the callback runs.
    pub fn on_invalidate<F>(&self, scope: InvalidationScope, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut receiver = self.bus.subscribe();
        let context_id = self.context_id;
        let session = Arc::clone(&self.session);

        let handle = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if event.key != ACCESS_TOKEN_KEY || event.new_value.is_some() {
                            continue;
                        }
                        let external = event.origin != context_id;
                        if external {
                            purge(session.as_ref());
                        }
                        if external || scope == InvalidationScope::Any {
                            callback();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Storage event subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { handle }
    }

    fn backends(&self) -> [&Arc<dyn KeyValueStorage>; 2] {
        [&self.durable, &self.session]
    }

    fn read_first(&self, keys: &[&str]) -> Option<String> {
        for backend in self.backends() {
            for key in keys {
                match backend.get_item(key) {
                    Ok(Some(value)) if !value.is_empty() => return Some(value),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(storage = %backend.kind(), key = *key, "Failed to read token: {}", e);
                    }
                }
            }
        }
        None
    }

    fn write(&self, backend: &Arc<dyn KeyValueStorage>, key: &str, value: &str) {
        if let Err(e) = backend.set_item(key, value) {
            warn!(storage = %backend.kind(), key, "Failed to write token: {}", e);
        }
    }

    fn publish(&self, key: &str, new_value: Option<&str>) {
        self.bus.publish(StorageEvent {
            origin: self.context_id,
            key: key.to_string(),
            new_value: new_value.map(str::to_owned),
        });
    }
}

fn purge(backend: &dyn KeyValueStorage) {
    for key in ALL_KEYS {
        if let Err(e) = backend.remove_item(key) {
            warn!(storage = %backend.kind(), key, "Failed to remove token: {}", e);
        }
    }
}
