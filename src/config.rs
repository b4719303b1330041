//! Tap configuration
//!
//! Loaded once from the `--config` JSON file and treated as immutable for the
//! rest of the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::http::DEFAULT_BASE_URL;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error reading {path}: {message}")]
    IoError {
        /// Path that failed
        path: String,
        /// Underlying error
        message: String,
    },

    /// Config file is not valid JSON or has wrong field types
    #[error("invalid config: {0}")]
    ParseError(String),

    /// Required key missing or value out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How the consumers stream fetches profiles for cached consumer ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerFetchMode {
    /// One `GET /consumers/{id}/profile` per consumer id
    #[default]
    Individual,
    /// `POST /consumers/profile/bulk` in chunks of ids
    Bulk,
}

/// Either a single business unit name or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BusinessUnitNames {
    /// A single name configured as a plain string
    One(String),
    /// A list of names
    Many(Vec<String>),
}

impl BusinessUnitNames {
    /// Names in configured order
    pub fn names(&self) -> Vec<String> {
        match self {
            Self::One(name) => vec![name.clone()],
            Self::Many(names) => names.clone(),
        }
    }
}

/// Tap configuration as read from `config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapConfig {
    /// API key, sent as the `apikey` header on every request
    pub access_key: String,
    /// OAuth client secret, required for authenticated streams
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Business user login, required for authenticated streams
    #[serde(default)]
    pub username: Option<String>,
    /// Business user password, required for authenticated streams
    #[serde(default)]
    pub password: Option<String>,
    /// Single business unit id
    #[serde(default)]
    pub business_unit_id: Option<String>,
    /// Business unit names resolved through `/business-units/find`
    #[serde(default)]
    pub business_units: Option<BusinessUnitNames>,
    /// Lower bound for incremental streams without a bookmark (RFC 3339)
    #[serde(default)]
    pub start_date: Option<String>,
    /// Optional `User-Agent` header
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Consumer profile fetch strategy
    #[serde(default)]
    pub consumer_fetch_mode: ConsumerFetchMode,
    /// API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl TapConfig {
    /// Minimal config for a single business unit
    pub fn new(access_key: impl Into<String>, business_unit_id: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            client_secret: None,
            username: None,
            password: None,
            business_unit_id: Some(business_unit_id.into()),
            business_units: None,
            start_date: None,
            user_agent: None,
            consumer_fetch_mode: ConsumerFetchMode::default(),
            base_url: default_base_url(),
        }
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading config");
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a config document
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TapConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check required keys and value formats
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_key.trim().is_empty() {
            return Err(ConfigError::Invalid("access_key must not be empty".to_string()));
        }

        let has_names = self
            .business_units
            .as_ref()
            .is_some_and(|names| !names.names().is_empty());
        if self.business_unit_id.is_none() && !has_names {
            return Err(ConfigError::Invalid(
                "config is missing key business_units or business_unit_id".to_string(),
            ));
        }

        if self.start_date.is_some() {
            self.start_date()?;
        }

        Ok(())
    }

    /// Parsed `start_date`, if configured
    pub fn start_date(&self) -> Result<Option<DateTime<Utc>>, ConfigError> {
        self.start_date
            .as_deref()
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| ConfigError::Invalid(format!("start_date '{raw}': {e}")))
            })
            .transpose()
    }

    /// Configured business unit names, when the list shape is used
    ///
    /// A non-empty `business_units` takes precedence over `business_unit_id`.
    pub fn business_unit_names(&self) -> Option<Vec<String>> {
        self.business_units
            .as_ref()
            .map(BusinessUnitNames::names)
            .filter(|names| !names.is_empty())
    }
}
