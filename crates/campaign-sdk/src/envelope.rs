//! The uniform response envelope returned by every client call
//!
//! Every transport outcome (success, HTTP error, network failure, timeout,
//! cancellation) is folded into one [`ResponseEnvelope`]. The fields are
//! private and the only constructors are [`ResponseEnvelope::success`] and
//! [`ResponseEnvelope::failure`], so a successful envelope never carries an
//! error and a failed one never carries data.

use crate::error::{ApiError, ErrorKind};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// `{ success, data?, error, statusCode? }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope<T> {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(skip)]
    kind: Option<ErrorKind>,
}

impl<T> ResponseEnvelope<T> {
    /// Successful outcome; `data` is `None` for empty or non-JSON bodies
    pub fn success(data: Option<T>, status_code: Option<u16>) -> Self {
        Self {
            success: true,
            data,
            error: None,
            status_code,
            kind: None,
        }
    }

    /// Failed outcome
    pub fn failure(kind: ErrorKind, error: impl Into<String>, status_code: Option<u16>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            status_code,
            kind: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn data(&self) -> Option<&T> {
        self.data.as_ref()
    }

    pub fn into_data(self) -> Option<T> {
        self.data
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    /// Failure classification; `None` for successful envelopes
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.kind
    }

    /// True for a 401 response that came back from the server
    pub fn is_unauthorized(&self) -> bool {
        !self.success && self.status_code == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Map the payload, keeping status and error untouched
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ResponseEnvelope<U> {
        ResponseEnvelope {
            success: self.success,
            data: self.data.map(f),
            error: self.error,
            status_code: self.status_code,
            kind: self.kind,
        }
    }

    /// Re-tag a failure, e.g. when a 401 becomes a session expiry
    pub fn with_kind(mut self, kind: ErrorKind) -> Self {
        if !self.success {
            self.kind = Some(kind);
        }
        self
    }

    /// Convert into a `Result` for `?`-style consumers
    pub fn into_result(self) -> Result<Option<T>, ApiError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(ApiError::from_failure(
                self.kind.unwrap_or(ErrorKind::Server),
                self.error.unwrap_or_default(),
                self.status_code,
            ))
        }
    }
}

impl ResponseEnvelope<Value> {
    /// Decode the JSON payload into `T`.
    ///
    /// A payload that does not match `T` turns the envelope into an
    /// [`ErrorKind::InvalidResponse`] failure carrying the original status.
    pub fn decode<T: DeserializeOwned>(self) -> ResponseEnvelope<T> {
        let status_code = self.status_code;
        if !self.success {
            return ResponseEnvelope {
                success: false,
                data: None,
                error: self.error,
                status_code,
                kind: self.kind,
            };
        }
        match self.data {
            None => ResponseEnvelope::success(None, status_code),
            Some(value) => match serde_json::from_value::<T>(value) {
                Ok(data) => ResponseEnvelope::success(Some(data), status_code),
                Err(e) => ResponseEnvelope::failure(
                    ErrorKind::InvalidResponse,
                    format!("Unexpected response shape: {e}"),
                    status_code,
                ),
            },
        }
    }
}

/// Result of unwrapping a 2xx JSON body
#[derive(Debug, PartialEq)]
pub(crate) enum Payload {
    Data(Option<Value>),
    Rejected(String),
}

/// Unwrap a server-side `{ success, data }` envelope once, at the transport boundary.
///
/// Bodies that are not shaped like an envelope are returned as the data itself.
pub(crate) fn unwrap_payload(body: Value) -> Payload {
    let mut map = match body {
        Value::Object(map) => map,
        other => return Payload::Data(Some(other)),
    };

    let is_envelope = matches!(map.get("success"), Some(Value::Bool(_)))
        && (map.contains_key("data") || map.contains_key("error") || map.contains_key("message"));
    if !is_envelope {
        return Payload::Data(Some(Value::Object(map)));
    }

    if map.get("success") == Some(&Value::Bool(true)) {
        match map.remove("data") {
            None | Some(Value::Null) => Payload::Data(None),
            Some(data) => Payload::Data(Some(data)),
        }
    } else {
        let message = message_field(&map, "error")
            .or_else(|| message_field(&map, "message"))
            .unwrap_or_else(|| "Request was not successful".to_string());
        Payload::Rejected(message)
    }
}

/// Extract a human readable message from an error response body.
///
/// Order: `detail`, `message`, `error` (string or `{ message }`), raw text,
/// then a generic status line.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        let nested = map
            .get("error")
            .and_then(|e| e.as_object())
            .and_then(|e| message_field(e, "message"));
        if let Some(message) = message_field(&map, "detail")
            .or_else(|| message_field(&map, "message"))
            .or(nested)
            .or_else(|| message_field(&map, "error"))
        {
            return message;
        }
    }

    let text = body.trim();
    if !text.is_empty() {
        return text.to_string();
    }

    format!("Request failed with status {}", status.as_u16())
}

fn message_field(map: &serde_json::Map<String, Value>, field: &str) -> Option<String> {
    match map.get(field)? {
        Value::Null | Value::Object(_) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        // e.g. validation error lists
        other => Some(other.to_string()),
    }
}
