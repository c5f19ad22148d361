//! Single-flight token refresh
//!
//! A [`RefreshCoordinator`] guarantees at most one outstanding refresh call
//! per client. The first caller that hits an expired token starts a refresh
//! cycle on the runtime; every caller, including the first, waits in a FIFO
//! queue and receives the same outcome once the cycle finishes.

use super::navigator::Navigator;
use super::token_store::TokenStore;
use super::types::TokenGrant;
use crate::transport::{HttpTransport, RequestDescriptor};
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason shown when a failed refresh ends the session
const SESSION_EXPIRED_REASON: &str = "Your session has expired. Please log in again.";

/// Refresh failures, shared by every waiter of a cycle
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    MissingRefreshToken,

    #[error("Token refresh rejected: {0}")]
    Rejected(String),

    /// The store no longer holds a session to refresh
    #[error("Session already ended")]
    SessionEnded,

    #[error("Waiting for token refresh was cancelled")]
    Cancelled,

    #[error("Token refresh aborted")]
    Aborted,
}

/// Exchanges a refresh token for a new grant
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError>;
}

/// Refresher calling the primary auth service
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    transport: HttpTransport,
    path: String,
}

impl HttpRefresher {
    pub fn new(transport: HttpTransport, path: impl Into<String>) -> Self {
        Self {
            transport,
            path: path.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RefreshError> {
        let request = RequestDescriptor::post(self.path.as_str())
            .json(&json!({ "refresh_token": refresh_token }))
            .map_err(|e| RefreshError::Rejected(e.to_string()))?
            .skip_auth()
            .without_refresh();

        let envelope = self.transport.send(&request).await.envelope;
        if !envelope.is_success() {
            return Err(RefreshError::Rejected(
                envelope.error().unwrap_or("Token refresh failed").to_string(),
            ));
        }

        let envelope = envelope.decode::<TokenGrant>();
        match (envelope.is_success(), envelope.error().map(str::to_owned)) {
            (true, _) => envelope
                .into_data()
                .ok_or_else(|| RefreshError::Rejected("Refresh response carried no tokens".into())),
            (false, message) => Err(RefreshError::Rejected(
                message.unwrap_or_else(|| "Malformed refresh response".into()),
            )),
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Result<String, RefreshError>>,
}

enum RefreshState {
    Idle,
    Refreshing(VecDeque<Waiter>),
}

struct Inner {
    store: Arc<TokenStore>,
    refresher: Arc<dyn TokenRefresher>,
    navigator: Arc<dyn Navigator>,
    state: Mutex<RefreshState>,
    next_waiter: AtomicU64,
    cycles: AtomicU64,
}

impl Inner {
    async fn run_cycle(self: Arc<Self>) {
        let outcome = match self.store.refresh_token() {
            None => Err(RefreshError::MissingRefreshToken),
            Some(refresh_token) => {
                debug!("Refreshing access token");
                AssertUnwindSafe(self.refresher.refresh(&refresh_token))
                    .catch_unwind()
                    .await
                    .unwrap_or(Err(RefreshError::Aborted))
            }
        };

        let outcome = match outcome {
            Ok(grant) => {
                // Persist before anyone is woken so replays read the new token
                self.store
                    .set(&grant.access_token, grant.refresh_token.as_deref());
                info!("Access token refreshed");
                Ok(grant.access_token)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.store.clear();
                Err(e)
            }
        };

        let waiters = match mem::replace(&mut *self.state.lock(), RefreshState::Idle) {
            RefreshState::Refreshing(waiters) => waiters,
            RefreshState::Idle => VecDeque::new(),
        };
        debug!(waiters = waiters.len(), "Resolving refresh waiters");
        for waiter in waiters {
            // The caller may have gone away
            let _ = waiter.tx.send(outcome.clone());
        }

        if outcome.is_err() {
            self.navigator.redirect_to_login(SESSION_EXPIRED_REASON);
        }
    }

    fn remove_waiter(&self, id: u64) {
        if let RefreshState::Refreshing(waiters) = &mut *self.state.lock() {
            waiters.retain(|waiter| waiter.id != id);
        }
    }
}

/// Removes a queued waiter whose caller stopped waiting
struct WaiterGuard<'a> {
    inner: &'a Inner,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.inner.remove_waiter(self.id);
    }
}

/// Coordinates refreshes for one client
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("cycles", &self.cycles())
            .field("pending_waiters", &self.pending_waiters())
            .finish()
    }
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<TokenStore>,
        refresher: Arc<dyn TokenRefresher>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                refresher,
                navigator,
                state: Mutex::new(RefreshState::Idle),
                next_waiter: AtomicU64::new(0),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    /// Obtain a fresh access token after `stale` was rejected.
    ///
    /// Joins the running cycle if there is one, otherwise starts one. When no
    /// cycle is running and the store already holds a different token, that
    /// token is returned immediately.
    pub async fn refresh(
        &self,
        stale: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<String, RefreshError> {
        let (id, rx) = {
            let mut state = self.inner.state.lock();

            if matches!(*state, RefreshState::Idle) {
                match self.inner.store.access_token() {
                    None => return Err(RefreshError::SessionEnded),
                    Some(current) if stale.is_some_and(|stale| stale != current) => {
                        debug!("Token already rotated, skipping refresh");
                        return Ok(current);
                    }
                    Some(_) => {}
                }
            }

            let id = self.inner.next_waiter.fetch_add(1, Ordering::Relaxed);
            let (tx, rx) = oneshot::channel();
            let waiter = Waiter { id, tx };

            match &mut *state {
                RefreshState::Refreshing(waiters) => waiters.push_back(waiter),
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing(VecDeque::from([waiter]));
                    self.inner.cycles.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(Arc::clone(&self.inner).run_cycle());
                }
            }
            (id, rx)
        };

        let _guard = WaiterGuard {
            inner: &self.inner,
            id,
        };

        match cancel {
            Some(cancel) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RefreshError::Cancelled),
                outcome = rx => outcome.unwrap_or(Err(RefreshError::Aborted)),
            },
            None => rx.await.unwrap_or(Err(RefreshError::Aborted)),
        }
    }

    /// Number of refresh cycles started so far
    pub fn cycles(&self) -> u64 {
        self.inner.cycles.load(Ordering::Relaxed)
    }

    /// Callers currently queued on a running cycle
    pub fn pending_waiters(&self) -> usize {
        match &*self.inner.state.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing(waiters) => waiters.len(),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.state.lock(), RefreshState::Refreshing(_))
    }
}

/// How often a request may be replayed after a successful refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_replays: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_replays: 1 }
    }
}

impl RetryPolicy {
    /// A request is replayed at most once per dispatch, so anything above one
    /// is clamped to one
    pub fn new(max_replays: u32) -> Self {
        Self {
            max_replays: max_replays.min(1),
        }
    }

    /// Never refresh-and-replay; every 401 is surfaced as-is
    pub fn none() -> Self {
        Self { max_replays: 0 }
    }

    pub fn max_replays(&self) -> u32 {
        self.max_replays
    }

    /// A fresh budget for one dispatch
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            remaining: self.max_replays,
        }
    }
}

/// Replays left for one dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
}

impl RetryBudget {
    pub fn try_acquire(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}
