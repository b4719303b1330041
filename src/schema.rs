//! JSON schemas compiled into the binary

use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

const SCHEMA_SOURCES: [(&str, &str); 4] = [
    ("business_units", include_str!("schemas/business_units.json")),
    ("reviews", include_str!("schemas/reviews.json")),
    ("consumers", include_str!("schemas/consumers.json")),
    ("private_reviews", include_str!("schemas/private_reviews.json")),
];

/// Parsed schemas (loaded once)
static SCHEMAS: Lazy<Result<HashMap<&'static str, Value>, SchemaError>> =
    Lazy::new(|| parse_schemas(&SCHEMA_SOURCES));

/// Embedded schema errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A schema source is not valid JSON
    #[error("embedded schema for {stream} is invalid: {message}")]
    Invalid {
        /// Stream the schema belongs to
        stream: &'static str,
        /// Parser message
        message: String,
    },
}

fn parse_schemas(
    sources: &[(&'static str, &str)],
) -> Result<HashMap<&'static str, Value>, SchemaError> {
    sources
        .iter()
        .map(|(stream, source)| {
            serde_json::from_str(source)
                .map(|schema| (*stream, schema))
                .map_err(|e| SchemaError::Invalid {
                    stream: *stream,
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Embedded schema for a stream; `None` for a stream with no schema
pub fn embedded(stream: &str) -> Result<Option<&'static Value>, SchemaError> {
    let schemas = SCHEMAS.as_ref().map_err(Clone::clone)?;
    Ok(schemas.get(stream))
}
