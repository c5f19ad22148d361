//! Error types for the Campaign Hub CLI

use color_eyre::eyre::Report;
use thiserror::Error;

/// CLI error type with minimal variants
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration file issues
    #[error("Configuration error: {0}")]
    Config(#[from] campaign_common::ConfigurationError),

    /// API communication errors
    #[error(transparent)]
    Api(#[from] campaign_sdk::ApiError),

    /// Interactive prompt failed or was aborted
    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),

    /// Invalid command-line input
    #[error("{0}")]
    Usage(String),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Everything else (using color-eyre's Report for rich errors)
    #[error(transparent)]
    Internal(#[from] Report),
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
