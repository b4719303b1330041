//! Wire layer: sends one prepared request and returns status and body.
//!
//! Retry, classification and authentication live in [`super::ApiClient`];
//! senders only move bytes.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::{ApiRequest, Method, RawResponse, RequestBody, TransportError};

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// HTTP request timeout (seconds) - overall time for the entire request
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Failure to obtain any response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// The request timed out; retried by the client
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, DNS failure, TLS error and similar
    #[error("network error: {0}")]
    Network(String),
}

/// Sends a single request
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Send `request` once. Non-2xx statuses are returned, not raised.
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, SendError>;
}

/// Production sender backed by a pooled [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    client: Client,
}

impl ReqwestSender {
    /// Build a client with explicit connect and request timeouts
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                TransportError::Network(format!(
                    "failed to build HTTP client: {e}. Check system TLS configuration."
                ))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RequestSender for ReqwestSender {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, SendError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        debug!(status, bytes = body.len(), url = %request.url, "Response received");
        Ok(RawResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> SendError {
    if err.is_timeout() {
        SendError::Timeout(err.to_string())
    } else {
        SendError::Network(err.to_string())
    }
}
