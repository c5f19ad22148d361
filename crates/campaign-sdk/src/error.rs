//! Error types for the Campaign Hub SDK
//!
//! Request outcomes never surface as `Err` from the service clients; they are
//! normalized into [`ResponseEnvelope`](crate::ResponseEnvelope) values tagged
//! with an [`ErrorKind`]. [`ApiError`] covers construction and configuration
//! failures, and is what [`ResponseEnvelope::into_result`](crate::ResponseEnvelope::into_result)
//! converts a failed envelope into for callers that prefer `?`.

use thiserror::Error;

/// Classification of a failed request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The host could not be reached
    Connectivity,
    /// The request exceeded the client timeout
    Timeout,
    /// The caller cancelled the request
    Cancelled,
    /// The session expired and could not be refreshed
    SessionExpired,
    /// 401 that is not eligible for refresh (no token, non-primary service, or after a replay)
    Unauthorized,
    /// The request was rejected locally before reaching the wire
    Validation,
    /// Any other non-2xx response
    Server,
    /// A 2xx response whose body could not be decoded
    InvalidResponse,
}

/// Main error type for the SDK
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] campaign_common::ConfigurationError),

    /// Host unreachable
    #[error("Connection error: {message}")]
    Connectivity { message: String },

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Request cancelled by the caller
    #[error("Request cancelled")]
    Cancelled,

    /// Session expired and refresh failed
    #[error("Session expired: {message}")]
    SessionExpired { message: String },

    /// Authentication required or rejected
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Invalid request
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Non-2xx response from a service
    #[error("Request failed with status {status}: {message}")]
    Server { status: u16, message: String },

    /// Undecodable response body
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    /// Build an error from a failed envelope's parts
    pub fn from_failure(kind: ErrorKind, message: String, status: Option<u16>) -> Self {
        match kind {
            ErrorKind::Connectivity => ApiError::Connectivity { message },
            ErrorKind::Timeout => ApiError::Timeout,
            ErrorKind::Cancelled => ApiError::Cancelled,
            ErrorKind::SessionExpired => ApiError::SessionExpired { message },
            ErrorKind::Unauthorized => ApiError::Authentication { message },
            ErrorKind::Validation => ApiError::InvalidRequest { message },
            ErrorKind::InvalidResponse => ApiError::InvalidResponse { message },
            ErrorKind::Server => ApiError::Server {
                status: status.unwrap_or(500),
                message,
            },
        }
    }

    /// Get error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::HttpClient(_) => "CAMPAIGN_SDK_HTTP_CLIENT_ERROR",
            ApiError::Config(_) => "CAMPAIGN_SDK_CONFIG_ERROR",
            ApiError::Connectivity { .. } => "CAMPAIGN_SDK_CONNECTIVITY",
            ApiError::Timeout => "CAMPAIGN_SDK_TIMEOUT",
            ApiError::Cancelled => "CAMPAIGN_SDK_CANCELLED",
            ApiError::SessionExpired { .. } => "CAMPAIGN_SDK_SESSION_EXPIRED",
            ApiError::Authentication { .. } => "CAMPAIGN_SDK_AUTH_ERROR",
            ApiError::InvalidRequest { .. } => "CAMPAIGN_SDK_INVALID_REQUEST",
            ApiError::Server { .. } => "CAMPAIGN_SDK_SERVER_ERROR",
            ApiError::InvalidResponse { .. } => "CAMPAIGN_SDK_INVALID_RESPONSE",
            ApiError::Serialization(_) => "CAMPAIGN_SDK_SERIALIZATION_ERROR",
        }
    }

    /// Check if error is retryable by the user
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Connectivity { .. } | ApiError::Timeout => true,
            ApiError::Server { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Check if error is a client error
    pub fn is_client_error(&self) -> bool {
        match self {
            ApiError::Authentication { .. }
            | ApiError::SessionExpired { .. }
            | ApiError::InvalidRequest { .. } => true,
            ApiError::Server { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_properties() {
        assert!(ApiError::Timeout.is_retryable());
        assert!(ApiError::Connectivity {
            message: "unreachable".to_string()
        }
        .is_retryable());
        assert!(!ApiError::SessionExpired {
            message: "expired".to_string()
        }
        .is_retryable());

        let not_found = ApiError::from_failure(ErrorKind::Server, "missing".into(), Some(404));
        assert!(not_found.is_client_error());
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.error_code(), "CAMPAIGN_SDK_SERVER_ERROR");

        let unavailable = ApiError::from_failure(ErrorKind::Server, "down".into(), Some(503));
        assert!(unavailable.is_retryable());
        assert!(!unavailable.is_client_error());
    }

    #[test]
    fn test_from_failure_maps_kinds() {
        assert!(matches!(
            ApiError::from_failure(ErrorKind::Unauthorized, "nope".into(), Some(401)),
            ApiError::Authentication { .. }
        ));
        assert!(matches!(
            ApiError::from_failure(ErrorKind::Validation, "bad".into(), None),
            ApiError::InvalidRequest { .. }
        ));
        assert_eq!(
            ApiError::from_failure(ErrorKind::Cancelled, String::new(), None).error_code(),
            "CAMPAIGN_SDK_CANCELLED"
        );
    }
}
