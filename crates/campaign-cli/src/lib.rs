//! # Campaign Hub CLI
//!
//! Terminal front-end over `campaign-sdk`: sign in, inspect the session,
//! probe the backends and issue ad-hoc authenticated requests.
//!
//! Credentials persist in a JSON file under the platform data directory, so
//! every invocation is one execution context sharing that durable store.

pub mod cli;
pub mod error;
pub mod output;

pub use cli::*;
pub use error::*;
