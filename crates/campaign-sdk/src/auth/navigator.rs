//! The login-surface seam
//!
//! The SDK never renders anything. When a session ends irrecoverably, or the
//! user logs out, it asks a [`Navigator`] to take the user to the login
//! surface. Front-ends plug in their own implementation.

use tracing::warn;

pub trait Navigator: Send + Sync {
    /// Take the user to the login surface
    fn redirect_to_login(&self, reason: &str);
}

/// Navigator that only records the redirect in the logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn redirect_to_login(&self, reason: &str) {
        warn!(reason, "Redirecting to login");
    }
}
