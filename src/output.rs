//! Record output
//!
//! The tap speaks the Singer message protocol: one JSON object per line on
//! stdout, tagged `SCHEMA`, `RECORD` or `STATE`.

use serde::Serialize;
use serde_json::Value;
use std::io::{Stdout, Write};

use crate::state::{StateDocument, StateError, StateStore};

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Destination for stream schemas and records
pub trait RecordSink {
    /// Declare a stream's shape before any of its records
    fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
    ) -> OutputResult<()>;

    /// Emit one ordered batch of records
    fn write_records(&mut self, stream: &str, records: &[Value]) -> OutputResult<()>;
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum Message<'a> {
    Schema {
        stream: &'a str,
        schema: &'a Value,
        key_properties: &'a [String],
    },
    Record {
        stream: &'a str,
        record: &'a Value,
    },
    State {
        value: &'a StateDocument,
    },
}

/// Line-delimited Singer message writer
pub struct SingerWriter<W: Write> {
    writer: W,
}

impl SingerWriter<Stdout> {
    /// Writer on the process's stdout
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> SingerWriter<W> {
    /// Wrap any writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the inner writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_message(&mut self, message: &Message<'_>) -> OutputResult<()> {
        serde_json::to_writer(&mut self.writer, message)
            .map_err(|e| OutputError::SerializationError(e.to_string()))?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| OutputError::IoError(e.to_string()))
    }

    fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::IoError(e.to_string()))
    }
}

impl<W: Write> RecordSink for SingerWriter<W> {
    fn write_schema(
        &mut self,
        stream: &str,
        schema: &Value,
        key_properties: &[String],
    ) -> OutputResult<()> {
        self.write_message(&Message::Schema {
            stream,
            schema,
            key_properties,
        })?;
        self.flush()
    }

    fn write_records(&mut self, stream: &str, records: &[Value]) -> OutputResult<()> {
        for record in records {
            self.write_message(&Message::Record { stream, record })?;
        }
        self.flush()
    }
}

impl<W: Write> StateStore for SingerWriter<W> {
    fn persist(&mut self, state: &StateDocument) -> Result<(), StateError> {
        self.write_message(&Message::State { value: state })
            .and_then(|_| self.flush())
            .map_err(|e| StateError::EmitError(e.to_string()))
    }
}

/// Fans a checkpoint out to several stores, in order
#[derive(Default)]
pub struct StateStores {
    stores: Vec<Box<dyn StateStore>>,
}

impl StateStores {
    /// No stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a store
    pub fn with(mut self, store: impl StateStore + 'static) -> Self {
        self.stores.push(Box::new(store));
        self
    }
}

impl StateStore for StateStores {
    fn persist(&mut self, state: &StateDocument) -> Result<(), StateError> {
        for store in &mut self.stores {
            store.persist(state)?;
        }
        Ok(())
    }
}
