//! ext_updater - Package update checking for chrome apps hosted by the runtime.
//!
//! Answers one question on a timer: is there a newer version of the application
//! package (or of the runtime package it depends on), and if so, fetch and
//! install it. The most recent answer is kept as a shared, re-awaitable future
//! so `chrome.runtime.requestUpdateCheck` always sees a finished poll cycle.
//!
//! Error codes: 5000-5099

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod coordinator;
pub mod crx;
pub mod http;
pub mod source;
pub mod version;

pub use coordinator::{
    PendingUpdate, PollOutcome, UpdateCheckStatus, UpdateCoordinator, UpdateDetails,
    UpdaterStatus, DEFAULT_POLL_INTERVAL,
};
pub use http::HttpPackageSource;
pub use source::{check_for_update, CallCounts, MemoryPackageSource, PackageSource};
pub use version::{compare_versions, is_newer};

// ============================================================================
// Error Types (Error codes: 5000-5099)
// ============================================================================

/// Error codes for the updater extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdaterErrorCode {
    /// Generic updater error (5000)
    Generic = 5000,
    /// Remote version query failed (5001)
    SourceUnavailable = 5001,
    /// Failed to download a package (5002)
    DownloadFailed = 5002,
    /// Package checksum mismatch (5003)
    VerificationFailed = 5003,
    /// Downloaded package could not be installed (5004)
    ExtractFailed = 5004,
    /// Version manifest could not be parsed (5007)
    InvalidManifest = 5007,
}

/// Updater extension error type.
///
/// `Clone` so a failed poll cycle can live inside the shared pending future.
#[derive(Debug, Clone, Error)]
pub enum UpdaterError {
    #[error("[{code:?}] {message}")]
    Generic {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    SourceUnavailable {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    DownloadFailed {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    VerificationFailed {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    ExtractFailed {
        code: UpdaterErrorCode,
        message: String,
    },

    #[error("[{code:?}] {message}")]
    InvalidManifest {
        code: UpdaterErrorCode,
        message: String,
    },
}

impl UpdaterError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            code: UpdaterErrorCode::Generic,
            message: message.into(),
        }
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            code: UpdaterErrorCode::SourceUnavailable,
            message: message.into(),
        }
    }

    pub fn download_failed(message: impl Into<String>) -> Self {
        Self::DownloadFailed {
            code: UpdaterErrorCode::DownloadFailed,
            message: message.into(),
        }
    }

    pub fn verification_failed(message: impl Into<String>) -> Self {
        Self::VerificationFailed {
            code: UpdaterErrorCode::VerificationFailed,
            message: message.into(),
        }
    }

    pub fn extract_failed(message: impl Into<String>) -> Self {
        Self::ExtractFailed {
            code: UpdaterErrorCode::ExtractFailed,
            message: message.into(),
        }
    }

    pub fn invalid_manifest(message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            code: UpdaterErrorCode::InvalidManifest,
            message: message.into(),
        }
    }

    pub fn code(&self) -> UpdaterErrorCode {
        match self {
            Self::Generic { code, .. }
            | Self::SourceUnavailable { code, .. }
            | Self::DownloadFailed { code, .. }
            | Self::VerificationFailed { code, .. }
            | Self::ExtractFailed { code, .. }
            | Self::InvalidManifest { code, .. } => *code,
        }
    }
}

// ============================================================================
// Data Types
// ============================================================================

/// Identifies the application package or the runtime package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub id: String,
    pub version: String,
}

impl PackageIdentity {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
        }
    }
}

/// A package version available from a [`PackageSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub version: String,
    /// Where to fetch the CRX; sources fall back to their own layout when absent
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Expected SHA-256 of the CRX, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl UpdateRecord {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            download_url: None,
            sha256: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
