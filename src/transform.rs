//! Schema-driven record normalization
//!
//! Walks a record alongside its JSON schema, keeping declared properties only
//! and coercing scalar values to the declared type. The API returns some
//! timestamps without fractional seconds (`2021-05-01T10:00:00Z`); those are
//! padded to microsecond precision so every emitted date-time has one shape.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

/// Length of `YYYY-MM-DDTHH:MM:SSZ`
const SECOND_PRECISION_LEN: usize = 20;

/// Output format for normalized date-times
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Transform errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// No declared type accepts the value
    #[error("value {value} at {path} does not match schema type {expected}")]
    SchemaMismatch {
        /// JSON path of the offending value
        path: String,
        /// Declared type(s)
        expected: String,
        /// Offending value, rendered as JSON
        value: String,
    },
}

/// Result type for transform operations
pub type TransformResult<T> = Result<T, TransformError>;

/// Transform one record against its stream schema
pub fn transform(record: Value, schema: &Value) -> TransformResult<Value> {
    transform_value(record, schema, "$")
}

/// Transform a batch, preserving order
pub fn transform_all(records: Vec<Value>, schema: &Value) -> TransformResult<Vec<Value>> {
    records
        .into_iter()
        .map(|record| transform(record, schema))
        .collect()
}

/// Pad a second-precision date-time to microseconds
///
/// Strings longer than `YYYY-MM-DDTHH:MM:SSZ` already carry sub-second
/// precision and are returned unchanged. Returns `None` when a short string
/// is not a date-time.
pub fn normalize_datetime(value: &str) -> Option<String> {
    if value.len() > SECOND_PRECISION_LEN {
        return Some(value.to_string());
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ") {
        return Some(naive.and_utc().format(DATETIME_FORMAT).to_string());
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format(DATETIME_FORMAT).to_string())
}

/// Parse an API timestamp into UTC
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format a timestamp the way bookmarks and `startDateTime` expect it
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(ty)) => vec![ty.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn transform_value(value: Value, schema: &Value, path: &str) -> TransformResult<Value> {
    let types = declared_types(schema);

    // No type constraint: pass through, but still honour nested properties
    if types.is_empty() {
        return match value {
            Value::Object(map) if schema.get("properties").is_some() => {
                transform_object(map, schema, path)
            }
            other => Ok(other),
        };
    }

    if value.is_null() {
        return if types.contains(&"null") {
            Ok(Value::Null)
        } else {
            Err(mismatch(path, &types, &value))
        };
    }

    for ty in types.iter().filter(|ty| **ty != "null") {
        if let Some(result) = try_type(&value, ty, schema, path) {
            return result;
        }
    }

    Err(mismatch(path, &types, &value))
}

/// `None` when `ty` does not accept the value; `Some(Err)` when a nested
/// value fails.
fn try_type(value: &Value, ty: &str, schema: &Value, path: &str) -> Option<TransformResult<Value>> {
    match (ty, value) {
        ("object", Value::Object(map)) => Some(transform_object(map.clone(), schema, path)),
        ("array", Value::Array(items)) => Some(transform_array(items.clone(), schema, path)),
        ("string", Value::String(s)) => {
            if schema.get("format").and_then(Value::as_str) == Some("date-time") {
                normalize_datetime(s).map(|normalized| Ok(Value::String(normalized)))
            } else {
                Some(Ok(Value::String(s.clone())))
            }
        }
        ("string", Value::Number(n)) => Some(Ok(Value::String(n.to_string()))),
        ("string", Value::Bool(b)) => Some(Ok(Value::String(b.to_string()))),
        ("integer", Value::Number(n)) => to_integer(n).map(Ok),
        ("integer", Value::String(s)) => s.trim().parse::<i64>().ok().map(|i| Ok(Value::from(i))),
        ("number", Value::Number(n)) => Some(Ok(Value::Number(n.clone()))),
        ("number", Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(|n| Ok(Value::Number(n))),
        ("boolean", Value::Bool(b)) => Some(Ok(Value::Bool(*b))),
        ("boolean", Value::String(s)) => match s.to_ascii_lowercase().as_str() {
            "true" => Some(Ok(Value::Bool(true))),
            "false" => Some(Ok(Value::Bool(false))),
            _ => None,
        },
        _ => None,
    }
}

fn to_integer(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        return Some(Value::Number(n.clone()));
    }
    n.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| Value::from(f as i64))
}

fn transform_object(map: Map<String, Value>, schema: &Value, path: &str) -> TransformResult<Value> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(Value::Object(map));
    };

    let mut result = Map::with_capacity(map.len());
    for (key, value) in map {
        if let Some(property_schema) = properties.get(&key) {
            let child_path = format!("{path}.{key}");
            let transformed = transform_value(value, property_schema, &child_path)?;
            result.insert(key, transformed);
        }
    }
    Ok(Value::Object(result))
}

fn transform_array(items: Vec<Value>, schema: &Value, path: &str) -> TransformResult<Value> {
    let Some(item_schema) = schema.get("items") else {
        return Ok(Value::Array(items));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| transform_value(item, item_schema, &format!("{path}[{index}]")))
        .collect::<TransformResult<Vec<_>>>()
        .map(Value::Array)
}

fn mismatch(path: &str, types: &[&str], value: &Value) -> TransformError {
    TransformError::SchemaMismatch {
        path: path.to_string(),
        expected: types.join("|"),
        value: value.to_string(),
    }
}

/// RFC 3339 rendering used in log messages
pub fn display_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}
