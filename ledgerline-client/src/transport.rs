//! HTTP transport: timeout, bearer auth, response decoding and classification.

use std::sync::Arc;
use std::time::Duration;

use ledgerline_core::{ApiError, ApiResult, ErrorKind};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde_json::Value;

use crate::classify::{ErrorClassifier, RawFailure};
use crate::error::ClientError;
use crate::session::{LoginRedirect, SessionStore};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// A file sent as `multipart/form-data`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartUpload {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl MultipartUpload {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            field_name: "file".to_string(),
            file_name: file_name.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn to_form(&self) -> Result<Form, reqwest::Error> {
        let mut part = Part::bytes(self.bytes.clone()).file_name(self.file_name.clone());
        if let Some(content_type) = &self.content_type {
            part = part.mime_str(content_type)?;
        }
        Ok(Form::new().part(self.field_name.clone(), part))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    #[default]
    None,
    Json(Value),
    Multipart(MultipartUpload),
}

/// Everything about a call except the endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub method: Method,
    pub body: RequestBody,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            body: RequestBody::None,
            headers: Vec::new(),
            query: Vec::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post_json(body: Value) -> Self {
        Self::new(Method::POST).json(body)
    }

    pub fn patch_json(body: Value) -> Self {
        Self::new(Method::PATCH).json(body)
    }

    pub fn upload(file: MultipartUpload) -> Self {
        Self {
            body: RequestBody::Multipart(file),
            ..Self::new(Method::POST)
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// The body as JSON; text and empty bodies become `Null`.
    pub fn into_json(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(_) | ResponseBody::Empty => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: ResponseBody,
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Connection settings for [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub base_url: String,
    /// Sent as the `apikey` header when present.
    pub anon_key: Option<String>,
    pub request_timeout: Duration,
    pub classifier: ErrorClassifier,
}

impl TransportSettings {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            anon_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            classifier: ErrorClassifier::default(),
        }
    }
}

/// Single remote call with timeout, auth injection and classification.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    default_headers: HeaderMap,
    timeout: Duration,
    classifier: ErrorClassifier,
    session: SessionStore,
    redirect: Arc<dyn LoginRedirect>,
}

impl Transport {
    pub fn new(
        settings: TransportSettings,
        session: SessionStore,
        redirect: Arc<dyn LoginRedirect>,
    ) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().build()?;
        let mut default_headers = HeaderMap::new();
        if let Some(anon_key) = &settings.anon_key {
            default_headers.insert(
                HeaderName::from_static("apikey"),
                HeaderValue::from_str(anon_key)
                    .map_err(|e| ClientError::InvalidHeader(e.to_string()))?,
            );
        }
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            default_headers,
            timeout: settings.request_timeout,
            classifier: settings.classifier,
            session,
            redirect,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute one request against `endpoint` (a path below the base URL).
    pub async fn execute(&self, endpoint: &str, options: &RequestOptions) -> ApiResult<TransportResponse> {
        let operation = format!("{} {}", options.method, endpoint);
        let result = match tokio::time::timeout(self.timeout, self.send(endpoint, options)).await {
            Ok(result) => result,
            Err(_) => Err(RawFailure::Timeout {
                operation: operation.clone(),
            }),
        };

        match result {
            Ok(response) => {
                tracing::debug!(operation = %operation, status = response.status, "Remote call succeeded");
                Ok(response)
            }
            Err(failure) => {
                let error = self.classifier.classify(&failure);
                if error.kind == ErrorKind::Unauthorized {
                    self.end_session();
                }
                tracing::debug!(
                    operation = %operation,
                    kind = %error.kind,
                    code = %error.code,
                    "Remote call failed"
                );
                Err(error)
            }
        }
    }

    async fn send(&self, endpoint: &str, options: &RequestOptions) -> Result<TransportResponse, RawFailure> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut request = self
            .client
            .request(options.method.clone(), url)
            .headers(self.default_headers.clone());

        if let Some(token) = self.session.token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        request = match &options.body {
            RequestBody::None => request,
            RequestBody::Json(body) => request.json(body),
            // reqwest sets multipart/form-data with the boundary itself.
            RequestBody::Multipart(file) => request.multipart(file.to_form().map_err(network_failure)?),
        };
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(network_failure)?;
        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("json"));
        let text = response.text().await.map_err(network_failure)?;

        if !status.is_success() {
            return Err(RawFailure::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body: text,
            });
        }

        let body = if status.as_u16() == 204 || text.trim().is_empty() {
            ResponseBody::Empty
        } else if is_json {
            let value = serde_json::from_str(&text).map_err(|e| RawFailure::Malformed {
                message: format!("Malformed JSON response: {}", e),
            })?;
            ResponseBody::Json(value)
        } else {
            ResponseBody::Text(text)
        };
        Ok(TransportResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn end_session(&self) {
        if let Err(e) = self.session.clear() {
            tracing::warn!(error = %e, "Failed to clear session token");
        }
        tracing::info!("Unauthorized response; redirecting to login");
        self.redirect.redirect_to_login();
    }
}

fn network_failure(error: reqwest::Error) -> RawFailure {
    RawFailure::Network {
        message: error.to_string(),
    }
}

/// Convert a JSON response into the rows it carries.
///
/// A bare object counts as a single row; an empty body as no rows.
pub fn into_rows(body: ResponseBody) -> ApiResult<Vec<Value>> {
    match body.into_json() {
        Value::Array(rows) => Ok(rows),
        Value::Null => Ok(Vec::new()),
        row @ Value::Object(_) => Ok(vec![row]),
        other => Err(ApiError::unknown(format!("Unexpected response shape: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_options_builders() {
        let options = RequestOptions::post_json(json!({"a": 1}))
            .header("Prefer", "return=representation")
            .query("select", "*");
        assert_eq!(options.method, Method::POST);
        assert_eq!(options.body, RequestBody::Json(json!({"a": 1})));
        assert_eq!(options.headers.len(), 1);
        assert_eq!(options.query, vec![("select".to_string(), "*".to_string())]);

        let upload = RequestOptions::upload(MultipartUpload::new("a.pdf", vec![1, 2]));
        assert_eq!(upload.method, Method::POST);
        assert!(matches!(upload.body, RequestBody::Multipart(_)));
    }

    #[test]
    fn test_into_rows_shapes() {
        assert_eq!(into_rows(ResponseBody::Json(json!([{"id": 1}]))).unwrap().len(), 1);
        assert_eq!(into_rows(ResponseBody::Json(json!({"id": 1}))).unwrap().len(), 1);
        assert!(into_rows(ResponseBody::Empty).unwrap().is_empty());
        assert!(into_rows(ResponseBody::Text("ok".into())).unwrap().is_empty());
        assert!(into_rows(ResponseBody::Json(json!(42))).is_err());
    }
}
