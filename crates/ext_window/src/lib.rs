//! ext_window - Window/context host interface used by the chrome runtime shim.
//!
//! The runtime never talks to a windowing toolkit directly. Everything it needs
//! from the shell (creating and closing windows, navigating them, relaunching
//! the process) goes through [`WindowHost`]. [`HeadlessHost`] is an in-memory
//! implementation used by the `crx-host` binary and by tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod headless;
pub use headless::HeadlessHost;

// ============================================================================
// Error Types (6000+ range)
// ============================================================================

/// Error codes for window operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WindowErrorCode {
    /// Generic window error
    Generic = 6000,
    /// Window not found
    WindowNotFound = 6002,
    /// Failed to create window
    CreateFailed = 6003,
    /// Window already closed
    WindowClosed = 6004,
    /// Navigation failed or the page never became ready
    LoadFailed = 6005,
    /// Process relaunch failed
    RelaunchFailed = 6015,
}

/// Custom error type for window operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum WindowError {
    #[error("[{code}] {message}")]
    Generic { code: u32, message: String },

    #[error("[{code}] Window not found: {window_id}")]
    WindowNotFound { code: u32, window_id: String },

    #[error("[{code}] Failed to create window: {message}")]
    CreateFailed { code: u32, message: String },

    #[error("[{code}] Window already closed: {window_id}")]
    WindowClosed { code: u32, window_id: String },

    #[error("[{code}] Failed to load {uri}: {message}")]
    LoadFailed {
        code: u32,
        uri: String,
        message: String,
    },

    #[error("[{code}] Failed to relaunch process: {message}")]
    RelaunchFailed { code: u32, message: String },
}

impl WindowError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            code: WindowErrorCode::Generic as u32,
            message: message.into(),
        }
    }

    pub fn not_found(window_id: impl Into<String>) -> Self {
        Self::WindowNotFound {
            code: WindowErrorCode::WindowNotFound as u32,
            window_id: window_id.into(),
        }
    }

    pub fn create_failed(message: impl Into<String>) -> Self {
        Self::CreateFailed {
            code: WindowErrorCode::CreateFailed as u32,
            message: message.into(),
        }
    }

    pub fn window_closed(window_id: impl Into<String>) -> Self {
        Self::WindowClosed {
            code: WindowErrorCode::WindowClosed as u32,
            window_id: window_id.into(),
        }
    }

    pub fn load_failed(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LoadFailed {
            code: WindowErrorCode::LoadFailed as u32,
            uri: uri.into(),
            message: message.into(),
        }
    }

    pub fn relaunch_failed(message: impl Into<String>) -> Self {
        Self::RelaunchFailed {
            code: WindowErrorCode::RelaunchFailed as u32,
            message: message.into(),
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// A live window as seen by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowHandle {
    /// Host-assigned id, unique for the life of the process
    pub id: String,
    /// App-assigned id (`chrome.app.window.create({id})`), if any
    pub key: Option<String>,
}

impl WindowHandle {
    pub fn has_key(&self, key: &str) -> bool {
        self.key.as_deref() == Some(key)
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} ({})", self.id, key),
            None => f.write_str(&self.id),
        }
    }
}

/// Inner content size of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

/// Options for creating a window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowConfig {
    pub key: Option<String>,
    pub inner_bounds: Option<Bounds>,
    pub title: Option<String>,
    pub hidden: bool,
}

/// Where devtools open relative to their window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevToolsMode {
    Detach,
    Docked,
}

// ============================================================================
// Host Interface
// ============================================================================

/// Operations the runtime needs from the window shell.
#[async_trait]
pub trait WindowHost: Send + Sync {
    /// Create a window. Creation may suspend (the shell answers asynchronously).
    async fn create_window(&self, config: WindowConfig) -> Result<WindowHandle, WindowError>;

    /// All open windows, in creation order.
    fn list_windows(&self) -> Vec<WindowHandle>;

    /// First open window carrying the app-assigned `key`.
    fn find_window(&self, key: &str) -> Option<WindowHandle> {
        self.list_windows().into_iter().find(|w| w.has_key(key))
    }

    fn close_window(&self, window: &WindowHandle) -> Result<(), WindowError>;

    fn hide_window(&self, window: &WindowHandle) -> Result<(), WindowError>;

    /// Navigate `window` to `uri`; resolves once the page reports it has loaded.
    async fn load_address(&self, window: &WindowHandle, uri: &str) -> Result<(), WindowError>;

    /// While `owner` is open, user requests to close `target` hide it instead.
    /// [`WindowHost::close_window`] itself is never intercepted.
    fn hide_instead_of_close(
        &self,
        owner: &WindowHandle,
        target: &WindowHandle,
    ) -> Result<(), WindowError>;

    fn open_devtools(&self, window: &WindowHandle, mode: DevToolsMode) -> Result<(), WindowError>;

    /// Start a fresh copy of the process.
    fn relaunch_process(&self) -> Result<(), WindowError>;

    /// Terminate this process with `code`.
    fn exit_process(&self, code: i32);
}

// ============================================================================
// Tests
// ============================================================================
