//! # Campaign Hub common
//!
//! Ambient helpers shared by the Campaign Hub crates:
//! - [`logging`]: tracing subscriber initialisation for binaries
//! - [`config`]: the layered configuration loader used by every config type

pub mod config;
pub mod logging;

pub use config::{ConfigLoader, ConfigurationError};
