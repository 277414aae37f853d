//! runtime:app - Lifecycle and update orchestration for a hosted chrome app.
//!
//! This extension provides:
//! - First-run package acquisition and process relaunch
//! - The singleton background page and its ready hook
//! - Graceful reload of every window except the caller
//! - The `chrome.runtime` surface handed to app code

use std::path::{Path, PathBuf};
use std::time::Duration;

use ext_storage::StorageError;
use ext_updater::UpdaterError;
use ext_window::{Bounds, WindowError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

pub mod background;
pub mod context;
pub mod lifecycle;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use background::{background_page_uri, BackgroundManager, BACKGROUND_ID, BACKGROUND_PAGE};
pub use context::{ProcessConfig, ProcessContext};
pub use lifecycle::{Bootstrap, LifecycleController, LifecycleState};
pub use runtime::ChromeRuntime;

// ============================================================================
// Error Types
// ============================================================================

/// Error codes for app operations (8300-8319)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorCode {
    /// Bootstrap could not bring the app up (8300)
    BootstrapFailed = 8300,
    /// Failed to relaunch application (8302)
    RelaunchFailed = 8302,
    /// Manifest unreadable (8304)
    InvalidManifest = 8304,
    /// Operation needs a running app (8314)
    NotRunning = 8314,
    /// Reload already in progress (8315)
    AlreadyReloading = 8315,
    /// Package source failure (8316)
    Updater = 8316,
    /// Window host failure (8317)
    Window = 8317,
    /// Persistent store failure (8318)
    Storage = 8318,
}

impl std::fmt::Display for AppErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", *self as i32)
    }
}

/// Errors that can occur during app operations
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("[{code}] Bootstrap failed: {message}")]
    BootstrapFailed { code: AppErrorCode, message: String },

    #[error("[{code}] Failed to relaunch application: {message}")]
    RelaunchFailed { code: AppErrorCode, message: String },

    #[error("[{code}] Invalid manifest: {message}")]
    InvalidManifest { code: AppErrorCode, message: String },

    #[error("[{code}] App not running: {message}")]
    NotRunning { code: AppErrorCode, message: String },

    #[error("[{code}] Reload already in progress")]
    AlreadyReloading { code: AppErrorCode },

    #[error("[{code}] {source}")]
    Updater {
        code: AppErrorCode,
        #[source]
        source: UpdaterError,
    },

    #[error("[{code}] {source}")]
    Window {
        code: AppErrorCode,
        #[source]
        source: WindowError,
    },

    #[error("[{code}] {source}")]
    Storage {
        code: AppErrorCode,
        #[source]
        source: StorageError,
    },
}

impl AppError {
    pub fn bootstrap_failed(message: impl Into<String>) -> Self {
        Self::BootstrapFailed {
            code: AppErrorCode::BootstrapFailed,
            message: message.into(),
        }
    }

    pub fn relaunch_failed(message: impl Into<String>) -> Self {
        Self::RelaunchFailed {
            code: AppErrorCode::RelaunchFailed,
            message: message.into(),
        }
    }

    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            code: AppErrorCode::InvalidManifest,
            message: message.into(),
        }
    }

    pub fn not_running(message: impl Into<String>) -> Self {
        Self::NotRunning {
            code: AppErrorCode::NotRunning,
            message: message.into(),
        }
    }

    pub fn already_reloading() -> Self {
        Self::AlreadyReloading {
            code: AppErrorCode::AlreadyReloading,
        }
    }

    pub fn code(&self) -> AppErrorCode {
        match self {
            Self::BootstrapFailed { code, .. }
            | Self::RelaunchFailed { code, .. }
            | Self::InvalidManifest { code, .. }
            | Self::NotRunning { code, .. }
            | Self::AlreadyReloading { code }
            | Self::Updater { code, .. }
            | Self::Window { code, .. }
            | Self::Storage { code, .. } => *code,
        }
    }
}

impl From<UpdaterError> for AppError {
    fn from(source: UpdaterError) -> Self {
        Self::Updater {
            code: AppErrorCode::Updater,
            source,
        }
    }
}

impl From<WindowError> for AppError {
    fn from(source: WindowError) -> Self {
        Self::Window {
            code: AppErrorCode::Window,
            source,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(source: StorageError) -> Self {
        Self::Storage {
            code: AppErrorCode::Storage,
            source,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Fixed runtime behavior that hosts may tune.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Scheme of app-internal addresses
    pub scheme: String,
    /// Time between update poll cycles
    pub poll_interval: Duration,
    /// Delay between closing other windows and closing the shell on reload
    pub reload_delay: Duration,
    pub background_bounds: Bounds,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            scheme: "chrome-extension".to_string(),
            poll_interval: ext_updater::DEFAULT_POLL_INTERVAL,
            reload_delay: Duration::from_millis(200),
            background_bounds: Bounds {
                width: 1000,
                height: 1000,
            },
        }
    }
}

// ============================================================================
// Manifest
// ============================================================================

pub const MANIFEST_FILE: &str = "manifest.json";

/// `<install_dir>/<app_id>/manifest.json`
pub fn manifest_path(install_dir: &Path, app_id: &str) -> PathBuf {
    install_dir.join(app_id).join(MANIFEST_FILE)
}

/// The installed app's manifest. Only `version` is interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppManifest {
    #[serde(default)]
    pub name: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppManifest {
    /// Load the installed manifest. `Ok(None)` means the package is not installed.
    pub fn load(install_dir: &Path, app_id: &str) -> Result<Option<Self>, AppError> {
        let path = manifest_path(install_dir, app_id);
        if !path.exists() {
            debug!(path = %path.display(), "manifest absent");
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| AppError::invalid_manifest(format!("{}: {}", path.display(), e)))?;
        let manifest = serde_json::from_str(&text)
            .map_err(|e| AppError::invalid_manifest(format!("{}: {}", path.display(), e)))?;
        Ok(Some(manifest))
    }
}

// ============================================================================
// Tests
// ============================================================================
