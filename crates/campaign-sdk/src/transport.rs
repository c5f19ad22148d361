//! Single HTTP exchanges normalized into response envelopes
//!
//! [`HttpTransport`] performs exactly one call per [`RequestDescriptor`]: it
//! attaches the current bearer token, applies the client timeout and the
//! caller's cancellation token, and folds whatever happens into a
//! [`ResponseEnvelope`]. It never retries and never refreshes; that is the
//! service client's job.

use crate::auth::TokenStore;
use crate::envelope::{error_message, unwrap_payload, Payload, ResponseEnvelope};
use crate::error::{ApiError, ErrorKind, Result};
use crate::query::encode_query;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// One field of a `multipart/form-data` body
#[derive(Debug, Clone)]
pub struct FormPart {
    name: String,
    value: FormValue,
}

#[derive(Debug, Clone)]
enum FormValue {
    Text(String),
    File {
        bytes: Bytes,
        file_name: String,
        mime: Option<String>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text(value.into()),
        }
    }

    pub fn file(
        name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                bytes: bytes.into(),
                file_name: file_name.into(),
                mime: None,
            },
        }
    }

    /// Set the MIME type of a file part; ignored for text parts
    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        if let FormValue::File { mime: slot, .. } = &mut self.value {
            *slot = Some(mime.into());
        }
        self
    }

    fn to_part(&self) -> reqwest::Result<Part> {
        match &self.value {
            FormValue::Text(text) => Ok(Part::text(text.clone())),
            FormValue::File {
                bytes,
                file_name,
                mime,
            } => {
                let part = Part::bytes(bytes.to_vec()).file_name(file_name.clone());
                match mime {
                    Some(mime) => part.mime_str(mime),
                    None => Ok(part),
                }
            }
        }
    }
}

/// Request payload, serialized up front so a replay re-sends identical bytes
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Bytes),
    /// Rebuilt into a fresh form on every attempt
    Multipart(Vec<FormPart>),
}

/// Everything needed to perform, and later replay, one call
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    headers: Vec<(String, String)>,
    body: RequestBody,
    query: Vec<(String, String)>,
    skip_auth: bool,
    refresh_on_unauthorized: bool,
    cancel: Option<CancellationToken>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            query: Vec::new(),
            skip_auth: false,
            refresh_on_unauthorized: true,
            cancel: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Serialize `body` as the JSON payload
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self> {
        self.body = RequestBody::Json(Bytes::from(serde_json::to_vec(body)?));
        Ok(self)
    }

    /// Validate and attach query parameters; see [`encode_query`]
    pub fn query<Q: Serialize + ?Sized>(mut self, query: &Q) -> Result<Self> {
        self.query.extend(encode_query(query)?.into_pairs());
        Ok(self)
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send without the bearer token
    pub fn skip_auth(mut self) -> Self {
        self.skip_auth = true;
        self
    }

    /// Surface a 401 as-is instead of refreshing the session
    pub fn without_refresh(mut self) -> Self {
        self.refresh_on_unauthorized = false;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn is_skip_auth(&self) -> bool {
        self.skip_auth
    }

    pub fn refreshes_on_unauthorized(&self) -> bool {
        self.refresh_on_unauthorized
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}

/// Outcome of one exchange
#[derive(Debug, Clone)]
pub struct Attempt {
    pub envelope: ResponseEnvelope<Value>,
    /// Access token that was attached, if any
    pub bearer: Option<String>,
}

/// HTTP exchange against one service base URL
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http_client: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
        tokens: Arc<TokenStore>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        Url::parse(&base_url).map_err(|e| ApiError::InvalidRequest {
            message: format!("Invalid base URL '{base_url}': {e}"),
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(ApiError::HttpClient)?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Perform one exchange; never fails, every outcome is an envelope
    pub async fn send(&self, request: &RequestDescriptor) -> Attempt {
        let bearer = if request.skip_auth {
            None
        } else {
            self.tokens.access_token()
        };

        let envelope = match &request.cancel {
            Some(cancel) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(path = %request.path, "Request cancelled");
                        ResponseEnvelope::failure(ErrorKind::Cancelled, "Request cancelled", None)
                    }
                    envelope = self.exchange(request, bearer.as_deref()) => envelope,
                }
            }
            None => self.exchange(request, bearer.as_deref()).await,
        };

        Attempt { envelope, bearer }
    }

    fn url_for(&self, request: &RequestDescriptor) -> std::result::Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            self.base_url,
            request.path.trim_start_matches('/')
        ))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    async fn exchange(
        &self,
        request: &RequestDescriptor,
        bearer: Option<&str>,
    ) -> ResponseEnvelope<Value> {
        let url = match self.url_for(request) {
            Ok(url) => url,
            Err(e) => {
                return ResponseEnvelope::failure(
                    ErrorKind::Validation,
                    format!("Invalid request path '{}': {}", request.path, e),
                    None,
                )
            }
        };

        let is_multipart = matches!(request.body, RequestBody::Multipart(_));
        let mut builder = self.http_client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            // The multipart boundary header is set by reqwest
            if is_multipart && name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => {
                let has_content_type = request
                    .headers
                    .iter()
                    .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
                if has_content_type {
                    builder.body(bytes.clone())
                } else {
                    builder
                        .header(CONTENT_TYPE, "application/json")
                        .body(bytes.clone())
                }
            }
            RequestBody::Multipart(parts) => match build_form(parts) {
                Ok(form) => builder.multipart(form),
                Err(e) => {
                    return ResponseEnvelope::failure(
                        ErrorKind::Validation,
                        format!("Invalid upload: {e}"),
                        None,
                    )
                }
            },
        };

        debug!(method = %request.method, path = %request.path, "Sending request");
        match builder.send().await {
            Ok(response) => self.normalize(response).await,
            Err(e) => self.transport_failure(e),
        }
    }

    async fn normalize(&self, response: Response) -> ResponseEnvelope<Value> {
        let status = response.status();
        let status_code = Some(status.as_u16());
        let is_json = is_json_content_type(response.headers());
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return self.transport_failure(e),
        };

        if status.is_success() {
            // Only JSON bodies carry data
            if !is_json || body.iter().all(u8::is_ascii_whitespace) {
                return ResponseEnvelope::success(None, status_code);
            }
            return match serde_json::from_slice::<Value>(&body) {
                Ok(value) => match unwrap_payload(value) {
                    Payload::Data(data) => ResponseEnvelope::success(data, status_code),
                    Payload::Rejected(message) => {
                        ResponseEnvelope::failure(ErrorKind::Server, message, status_code)
                    }
                },
                Err(e) => {
                    debug!(error = %e, "Malformed JSON response body");
                    ResponseEnvelope::failure(
                        ErrorKind::InvalidResponse,
                        format!("Malformed JSON response: {e}"),
                        status_code,
                    )
                }
            };
        }

        let message = error_message(status, &String::from_utf8_lossy(&body));
        let kind = if status == StatusCode::UNAUTHORIZED {
            ErrorKind::Unauthorized
        } else {
            ErrorKind::Server
        };
        debug!(status = status.as_u16(), "Request failed");
        ResponseEnvelope::failure(kind, message, status_code)
    }

    fn transport_failure(&self, error: reqwest::Error) -> ResponseEnvelope<Value> {
        if error.is_timeout() {
            return ResponseEnvelope::failure(ErrorKind::Timeout, "Request timeout", None);
        }
        let message = if error.is_connect() {
            format!("Unable to connect to {}", self.base_url)
        } else {
            format!("Network error while contacting {}: {}", self.base_url, error)
        };
        debug!(error = %error, "Transport failure");
        ResponseEnvelope::failure(ErrorKind::Connectivity, message, None)
    }
}

/// `application/json` or any `+json` structured syntax suffix
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

fn build_form(parts: &[FormPart]) -> reqwest::Result<Form> {
    parts.iter().try_fold(Form::new(), |form, part| {
        Ok(form.part(part.name.clone(), part.to_part()?))
    })
}
