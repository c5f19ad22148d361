//! Authentication-related types

use serde::{Deserialize, Serialize};

/// The stored access/refresh token pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Access token presented on every request
    pub access_token: String,
    /// Refresh token used solely to mint a new access token
    pub refresh_token: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Tokens issued by the login and refresh endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    #[serde(alias = "accessToken", alias = "token")]
    pub access_token: String,
    /// Absent when the server keeps the current refresh token valid
    #[serde(default, alias = "refreshToken", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_token_grant_aliases() {
        let snake: TokenGrant =
            serde_json::from_value(json!({"access_token": "a", "refresh_token": "r"})).unwrap();
        let camel: TokenGrant =
            serde_json::from_value(json!({"accessToken": "a", "refreshToken": "r"})).unwrap();
        assert_eq!(snake, camel);

        let bare: TokenGrant = serde_json::from_value(json!({"token": "a"})).unwrap();
        assert_eq!(bare.access_token, "a");
        assert!(bare.refresh_token.is_none());
    }
}
