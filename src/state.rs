//! Sync state: the only object that survives between runs
//!
//! ```json
//! {
//!   "currently_syncing": "reviews",
//!   "bookmarks": {
//!     "private_reviews": { "buid(abc)_lastCreatedAt": "2021-05-01T10:00:00.000000Z" }
//!   }
//! }
//! ```
//!
//! [`FileStateStore`] writes the document atomically (temp file + rename)
//! under an exclusive lock on a sibling `.lock` file.

use fd_lock::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Maximum accepted state file size (10 MB)
pub const MAX_STATE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// State errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),

    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Stored bookmark is not a timestamp
    #[error("invalid bookmark {stream}/{key}: {value}")]
    InvalidBookmark {
        /// Stream id
        stream: String,
        /// Bookmark key
        key: String,
        /// Stored value
        value: String,
    },

    /// Output sink failed while writing a STATE message
    #[error("failed to emit state: {0}")]
    EmitError(String),
}

/// Persisted sync state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Stream in progress when the last checkpoint was written
    #[serde(default)]
    pub currently_syncing: Option<String>,
    /// `stream_id -> bookmark_key -> value`
    #[serde(default)]
    pub bookmarks: Map<String, Value>,
    /// Keys this tap does not manage, preserved as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateDocument {
    /// Empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a state document; an empty input yields an empty state
    pub fn from_json(json: &str) -> Result<Self, StateError> {
        if json.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(json).map_err(|e| StateError::DeserializationError(e.to_string()))
    }

    /// Stream recorded as in progress
    pub fn currently_syncing(&self) -> Option<&str> {
        self.currently_syncing.as_deref()
    }

    /// Record (or clear) the stream in progress
    pub fn set_currently_syncing(&mut self, stream: Option<&str>) {
        self.currently_syncing = stream.map(str::to_string);
    }

    /// Stored bookmark value, if it is a string
    pub fn bookmark(&self, stream: &str, key: &str) -> Option<&str> {
        self.bookmarks
            .get(stream)
            .and_then(|bookmarks| bookmarks.get(key))
            .and_then(Value::as_str)
    }

    /// Store a bookmark value
    pub fn set_bookmark(&mut self, stream: &str, key: &str, value: impl Into<String>) {
        let entry = self
            .bookmarks
            .entry(stream.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(bookmarks) = entry {
            bookmarks.insert(key.to_string(), Value::String(value.into()));
        }
    }
}

/// Durable checkpoint target
pub trait StateStore {
    /// Persist a full snapshot of the state
    fn persist(&mut self, state: &StateDocument) -> Result<(), StateError>;
}

/// Writes the state document to a file with atomic replace
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_lock_file(&self) -> Result<std::fs::File, StateError> {
        let lock_path = self.path.with_extension("lock");
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StateError::LockError(format!("Failed to create lock file: {e}")))
    }

    /// Load the state file; a missing file is an empty state
    pub fn load(&self) -> Result<StateDocument, StateError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "No state file, starting fresh");
            return Ok(StateDocument::new());
        }

        let lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .read()
            .map_err(|e| StateError::LockError(format!("Failed to acquire read lock: {e}")))?;

        let metadata =
            std::fs::metadata(&self.path).map_err(|e| StateError::IoError(e.to_string()))?;
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(StateError::StateTooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| StateError::IoError(e.to_string()))?;
        let state = StateDocument::from_json(&contents)?;

        info!(
            path = %self.path.display(),
            currently_syncing = ?state.currently_syncing,
            "State loaded"
        );
        Ok(state)
    }
}

impl StateStore for FileStateStore {
    fn persist(&mut self, state: &StateDocument) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StateError::IoError(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::SerializationError(e.to_string()))?;

        let mut lock = RwLock::new(self.open_lock_file()?);
        let _guard = lock
            .write()
            .map_err(|e| StateError::LockError(format!("Failed to acquire write lock: {e}")))?;

        let parent_dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| StateError::IoError(format!("Failed to create temp file: {e}")))?;

        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| StateError::IoError(format!("Failed to write to temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| StateError::IoError(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| StateError::IoError(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&self.path)
            .map_err(|e| StateError::IoError(format!("Failed to persist temp file: {e}")))?;

        debug!(
            path = %self.path.display(),
            currently_syncing = ?state.currently_syncing,
            "State checkpoint written"
        );
        Ok(())
    }
}
