//! runtime:storage - Persistent key-value store backing `localStorage`.
//!
//! The store is a single JSON object at `<user-data>/<app-id>.json`. It is read
//! once when opened and written back in full, synchronously, on every change, so
//! a value set right before the process exits is on disk for the next launch.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Keys the lifecycle code persists across a reload.
pub mod flags {
    /// Set to `true` right before a reload closes the shell window.
    pub const IS_RELOADING: &str = "isReloading";
    /// Whether the relaunched app should fire `activate` once its background is up.
    pub const WANTS_ACTIVATE: &str = "wantsActivate";
}

// ============================================================================
// Error Types with Structured Codes
// ============================================================================

/// Error codes for storage operations (8100-8109)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum StorageErrorCode {
    /// Generic storage error
    Generic = 8100,
    /// Backing file could not be read or parsed
    ReadFailed = 8101,
    /// Serialization error
    SerializationError = 8102,
    /// Backing file could not be written
    WriteFailed = 8103,
    /// Invalid key
    InvalidKey = 8106,
}

/// Custom error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("[{code}] Storage error: {message}")]
    Generic { code: u32, message: String },

    #[error("[{code}] Store read failed: {message}")]
    ReadFailed { code: u32, message: String },

    #[error("[{code}] Serialization error: {message}")]
    SerializationError { code: u32, message: String },

    #[error("[{code}] Store write failed: {message}")]
    WriteFailed { code: u32, message: String },

    #[error("[{code}] Invalid key: {message}")]
    InvalidKey { code: u32, message: String },
}

impl StorageError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            code: StorageErrorCode::Generic as u32,
            message: message.into(),
        }
    }

    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed {
            code: StorageErrorCode::ReadFailed as u32,
            message: message.into(),
        }
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            code: StorageErrorCode::SerializationError as u32,
            message: message.into(),
        }
    }

    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            code: StorageErrorCode::WriteFailed as u32,
            message: message.into(),
        }
    }

    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            code: StorageErrorCode::InvalidKey as u32,
            message: message.into(),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Generic { code, .. }
            | Self::ReadFailed { code, .. }
            | Self::SerializationError { code, .. }
            | Self::WriteFailed { code, .. }
            | Self::InvalidKey { code, .. } => *code,
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization_error(e.to_string())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Default directory for per-app user data.
pub fn default_user_data_dir(app_name: &str) -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(app_name)
}

/// Path of the store file for `app_id` inside `user_data_dir`.
pub fn store_path(user_data_dir: &Path, app_id: &str) -> PathBuf {
    user_data_dir.join(format!("{}.json", app_id))
}

fn load(path: &Path) -> Result<Map<String, Value>, StorageError> {
    let text = fs::read_to_string(path)
        .map_err(|e| StorageError::read_failed(format!("{}: {}", path.display(), e)))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StorageError::read_failed(format!(
            "{}: expected a JSON object, found {}",
            path.display(),
            json_kind(&other)
        ))),
        Err(e) => Err(StorageError::read_failed(format!("{}: {}", path.display(), e))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// JavaScript truthiness, which is what `getItem(..) || null` relied on.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// PersistentStore
// ============================================================================

/// Process-wide JSON key-value store.
#[derive(Debug)]
pub struct PersistentStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl PersistentStore {
    /// Open the store at `path`.
    ///
    /// A missing or corrupt file yields an empty store; the problem is logged and
    /// never returned to the caller.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match load(&path) {
            Ok(map) => {
                debug!(path = %path.display(), keys = map.len(), "storage.open");
                map
            }
            Err(e) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %e, "store unreadable, starting empty");
                } else {
                    debug!(path = %path.display(), "no store file yet, starting empty");
                }
                Map::new()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    /// Open `<user_data_dir>/<app_id>.json`.
    pub fn for_app(user_data_dir: &Path, app_id: &str) -> Self {
        Self::open(store_path(user_data_dir, app_id))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a value. Missing keys and stored `null` both read as `None`.
    pub fn get_item(&self, key: &str) -> Option<Value> {
        self.lock().get(key).filter(|v| !v.is_null()).cloned()
    }

    /// Read a value as a flag using JavaScript truthiness.
    pub fn get_flag(&self, key: &str) -> bool {
        self.lock().get(key).map(is_truthy).unwrap_or(false)
    }

    /// Set a value and write the whole store to disk before returning.
    pub fn set_item(&self, key: &str, value: impl Into<Value>) -> Result<(), StorageError> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("Key cannot be empty"));
        }
        let value = value.into();
        debug!(key = %key, "storage.set");

        let mut data = self.lock();
        data.insert(key.to_string(), value);
        self.flush(&data)
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove_item(&self, key: &str) -> Result<bool, StorageError> {
        debug!(key = %key, "storage.remove");

        let mut data = self.lock();
        if data.remove(key).is_none() {
            return Ok(false);
        }
        self.flush(&data)?;
        Ok(true)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn flush(&self, data: &Map<String, Value>) -> Result<(), StorageError> {
        let text = serde_json::to_string(data)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    StorageError::write_failed(format!("{}: {}", parent.display(), e))
                })?;
            }
        }

        // Write-then-rename so a crash mid-write never leaves a truncated store.
        let tmp = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };
        write().map_err(|e| StorageError::write_failed(format!("{}: {}", self.path.display(), e)))
    }

    fn lock(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ============================================================================
// Tests
// ============================================================================
