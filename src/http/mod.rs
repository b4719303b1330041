//! API client: authentication, request preparation and retry handling.
//!
//! Every request sent by [`ApiClient`]
//! - retries 429/503 and timeouts with exponential backoff (independent budgets)
//! - maps the "Pagination limit exceeded." 400 to an empty result
//! - fails fast on every other non-2xx status
//! - times each attempt and tags it with the HTTP status

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TapConfig;
use crate::metrics::{record_retry_backoff, HttpRequestMetrics};

pub mod auth;
pub mod retry;
pub mod sender;

pub use auth::{Credentials, AUTH_PATH};
pub use retry::{RetryContext, RetryPolicy, RetryReason};
pub use sender::{ReqwestSender, RequestSender, SendError};

/// Production API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.trustpilot.com/v1";

/// Placeholder for the active business unit in path templates
pub const BUSINESS_UNIT_PLACEHOLDER: &str = ":business_unit_id";

/// `details` value of the 400 returned when `page` exceeds the caller's access tier
pub const PAGINATION_LIMIT_DETAILS: &str = "Pagination limit exceeded.";

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Credential exchange failed or credentials missing
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 429/503 persisted through every retry
    #[error("rate limited (HTTP {status}) after {attempts} attempts: {endpoint}")]
    RateLimited {
        /// Last status seen
        status: u16,
        /// Attempts made
        attempts: u32,
        /// Request path
        endpoint: String,
    },

    /// Timeouts persisted through every retry
    #[error("request timed out after {attempts} attempts: {endpoint}")]
    Timeout {
        /// Attempts made
        attempts: u32,
        /// Request path
        endpoint: String,
    },

    /// Any other non-2xx response
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        /// Response status
        status: u16,
        /// Request path
        endpoint: String,
        /// Response body, for context
        body: String,
    },

    /// No response at all
    #[error("network error: {0}")]
    Network(String),

    /// 2xx response whose body is not JSON
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode {
        /// Request path
        endpoint: String,
        /// Parser message
        message: String,
    },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body
    Empty,
    /// `application/json`
    Json(Value),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
}

/// A fully prepared request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    /// Query parameters in insertion order
    pub query: Vec<(String, String)>,
    /// Headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Body
    pub body: RequestBody,
}

impl ApiRequest {
    /// First header with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// First query parameter with the given name
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Status and body of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status
    pub status: u16,
    /// Body text
    pub body: String,
}

impl RawResponse {
    /// Convenience constructor
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// JSON body with the given status
    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_pagination_limit(&self) -> bool {
        self.status == 400
            && serde_json::from_str::<Value>(&self.body)
                .ok()
                .and_then(|body| body.get("details").cloned())
                .is_some_and(|details| details == PAGINATION_LIMIT_DETAILS)
    }
}

/// Join a path onto a base URL with exactly one `/` between them
pub fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Substitute the business unit placeholder in a path template
pub fn render_path(template: &str, business_unit_id: &str) -> String {
    template.replace(BUSINESS_UNIT_PLACEHOLDER, business_unit_id)
}

/// Authenticated API client with retry handling
pub struct ApiClient {
    sender: Arc<dyn RequestSender>,
    base_url: String,
    access_key: String,
    user_agent: Option<String>,
    token: Option<String>,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client for `config` sending through `sender`
    pub fn new(config: &TapConfig, sender: Arc<dyn RequestSender>) -> Self {
        Self {
            sender,
            base_url: config.base_url.clone(),
            access_key: config.access_key.clone(),
            user_agent: config.user_agent.clone(),
            token: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the backoff schedule
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Whether a bearer token has been obtained
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Absolute URL for a path
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// Exchange credentials for a bearer token. Any failure is fatal.
    pub async fn authenticate(&mut self, config: &TapConfig) -> TransportResult<()> {
        let credentials = Credentials::from_config(config)?;
        let request = credentials.token_request(self.url(AUTH_PATH));

        info!("Requesting access token");
        let timer = HttpRequestMetrics::start("auth", AUTH_PATH, 1);
        let response = match self.sender.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                timer.record_network_error();
                return Err(TransportError::Auth(e.to_string()));
            }
        };
        timer.record_complete(response.status);

        if !response.is_success() {
            return Err(TransportError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                response.status, response.body
            )));
        }

        self.token = Some(auth::parse_token_response(&response.body)?);
        info!("Access token obtained");
        Ok(())
    }

    /// Authenticate unless a token is already held
    pub async fn ensure_auth(&mut self, config: &TapConfig) -> TransportResult<()> {
        if self.token.is_none() {
            self.authenticate(config).await?;
        }
        Ok(())
    }

    /// GET `path` with query parameters
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        stream: &str,
    ) -> TransportResult<Value> {
        let query = query
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        let request = self.prepare(Method::Get, path, query, RequestBody::Empty);
        self.execute(request, path, stream).await
    }

    /// POST a JSON body to `path`
    pub async fn post(&self, path: &str, body: Value, stream: &str) -> TransportResult<Value> {
        let request = self.prepare(Method::Post, path, Vec::new(), RequestBody::Json(body));
        self.execute(request, path, stream).await
    }

    fn prepare(
        &self,
        method: Method,
        path: &str,
        query: Vec<(String, String)>,
        body: RequestBody,
    ) -> ApiRequest {
        let mut headers = vec![("apikey".to_string(), self.access_key.clone())];
        if let Some(token) = &self.token {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        if let Some(user_agent) = &self.user_agent {
            headers.push(("User-Agent".to_string(), user_agent.clone()));
        }

        ApiRequest {
            method,
            url: self.url(path),
            query,
            headers,
            body,
        }
    }

    /// Send with retry on 429/503 and timeouts
    async fn execute(
        &self,
        request: ApiRequest,
        endpoint: &str,
        stream: &str,
    ) -> TransportResult<Value> {
        let max_attempts = self.retry.max_attempts();
        let mut rate_limited_attempts = 0u32;
        let mut timeout_attempts = 0u32;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            debug!(
                stream,
                method = %request.method,
                endpoint,
                attempt,
                "Sending request"
            );

            let timer = HttpRequestMetrics::start(stream, endpoint, attempt);
            let (reason, failed_attempts) = match self.sender.send(&request).await {
                Ok(response) => {
                    timer.record_complete(response.status);

                    if response.is_success() {
                        return decode_body(&response.body, endpoint);
                    }
                    if matches!(response.status, 429 | 503) {
                        rate_limited_attempts += 1;
                        (RetryReason::RateLimited(response.status), rate_limited_attempts)
                    } else if response.is_pagination_limit() {
                        warn!(stream, endpoint, "400 Bad Request, Pagination limit exceeded.");
                        return Ok(Value::Array(Vec::new()));
                    } else {
                        return Err(TransportError::Http {
                            status: response.status,
                            endpoint: endpoint.to_string(),
                            body: response.body,
                        });
                    }
                }
                Err(SendError::Timeout(message)) => {
                    timer.record_timeout();
                    debug!(stream, endpoint, error = %message, "Request timed out");
                    timeout_attempts += 1;
                    (RetryReason::Timeout, timeout_attempts)
                }
                Err(SendError::Network(message)) => {
                    timer.record_network_error();
                    return Err(TransportError::Network(message));
                }
            };

            let context = RetryContext {
                attempt: failed_attempts,
                max_attempts,
                reason,
                backoff: self.retry.delay_for(failed_attempts - 1),
                stream: stream.to_string(),
                endpoint: endpoint.to_string(),
            };

            if failed_attempts >= max_attempts {
                warn!("{}", context.format_failure());
                return Err(match reason {
                    RetryReason::RateLimited(status) => TransportError::RateLimited {
                        status,
                        attempts: failed_attempts,
                        endpoint: endpoint.to_string(),
                    },
                    RetryReason::Timeout => TransportError::Timeout {
                        attempts: failed_attempts,
                        endpoint: endpoint.to_string(),
                    },
                });
            }

            warn!("{}", context.format_retry());
            record_retry_backoff(context.backoff, reason.label());
            tokio::time::sleep(context.backoff).await;
        }
    }
}

fn decode_body(body: &str, endpoint: &str) -> TransportResult<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| TransportError::Decode {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })
}
