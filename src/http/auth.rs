//! Password-grant token exchange for business-user endpoints.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use super::{ApiRequest, Method, RequestBody, TransportError};
use crate::config::TapConfig;

/// Token endpoint, relative to the API base URL
pub const AUTH_PATH: &str = "/oauth/oauth-business-users-for-applications/accesstoken";

/// Credentials needed for the password grant
#[derive(Clone)]
pub struct Credentials {
    access_key: String,
    client_secret: String,
    username: String,
    password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Pull credentials out of the config; every missing key is named in the error
    pub fn from_config(config: &TapConfig) -> Result<Self, TransportError> {
        let mut missing = Vec::new();
        if config.client_secret.is_none() {
            missing.push("client_secret");
        }
        if config.username.is_none() {
            missing.push("username");
        }
        if config.password.is_none() {
            missing.push("password");
        }
        if !missing.is_empty() {
            return Err(TransportError::Auth(format!(
                "for authentication the config properties {} are required",
                missing.join(", ")
            )));
        }

        Ok(Self {
            access_key: config.access_key.clone(),
            client_secret: config.client_secret.clone().unwrap_or_default(),
            username: config.username.clone().unwrap_or_default(),
            password: config.password.clone().unwrap_or_default(),
        })
    }

    /// `Basic base64(access_key:client_secret)`
    pub fn basic_authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.access_key, self.client_secret));
        format!("Basic {encoded}")
    }

    /// Token request against `url`
    pub fn token_request(&self, url: String) -> ApiRequest {
        ApiRequest {
            method: Method::Post,
            url,
            query: Vec::new(),
            headers: vec![("Authorization".to_string(), self.basic_authorization())],
            body: RequestBody::Form(vec![
                ("grant_type".to_string(), "password".to_string()),
                ("username".to_string(), self.username.clone()),
                ("password".to_string(), self.password.clone()),
            ]),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Extract `access_token` from a successful token response body
pub fn parse_token_response(body: &str) -> Result<String, TransportError> {
    let parsed: TokenResponse = serde_json::from_str(body)
        .map_err(|e| TransportError::Auth(format!("invalid token response: {e}")))?;
    parsed
        .access_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| TransportError::Auth("token response has no access_token".to_string()))
}
