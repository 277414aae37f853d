//! Package sources: where versions are looked up and CRX packages come from.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::version::is_newer;
use crate::{UpdateRecord, UpdaterError};

/// Remote package lookup and installation.
#[async_trait]
pub trait PackageSource: Send + Sync {
    /// Query the newest published version of `id`.
    async fn get_latest_version(&self, id: &str) -> Result<UpdateRecord, UpdaterError>;

    /// Download the package described by `record`, returning the local CRX path.
    async fn download_crx(&self, id: &str, record: &UpdateRecord)
        -> Result<PathBuf, UpdaterError>;

    /// Install a downloaded CRX so the next launch picks it up.
    async fn extract_crx(&self, path: &Path) -> Result<(), UpdaterError>;

    /// Fetch and install the newest version of `id` regardless of what is installed.
    async fn download_latest_version(&self, id: &str) -> Result<UpdateRecord, UpdaterError> {
        let record = self.get_latest_version(id).await?;
        let crx = self.download_crx(id, &record).await?;
        self.extract_crx(&crx).await?;
        info!(id, version = %record.version, "Installed latest version");
        Ok(record)
    }
}

/// Check `id` against `current` and install the newer version if there is one.
///
/// Returns `Ok(None)` when the published version is not newer than `current`.
pub async fn check_for_update(
    source: &dyn PackageSource,
    id: &str,
    current: &str,
) -> Result<Option<UpdateRecord>, UpdaterError> {
    let latest = source.get_latest_version(id).await?;
    debug!(id, latest = %latest.version, current, "Version check");

    if !is_newer(&latest.version, current) {
        return Ok(None);
    }

    let crx = source.download_crx(id, &latest).await?;
    source.extract_crx(&crx).await?;
    Ok(Some(latest))
}

// ============================================================================
// In-memory source
// ============================================================================

/// Calls made against a [`MemoryPackageSource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub latest: usize,
    pub download: usize,
    pub extract: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    published: HashMap<String, UpdateRecord>,
    installed: HashMap<String, String>,
    unavailable: bool,
    failing_latest: HashSet<String>,
    failing_extract: HashSet<String>,
    calls: CallCounts,
    latest_calls: HashMap<String, usize>,
}

/// Package source backed by a map, for tests and offline hosts.
///
/// Download paths have the form `<id>/<version>.crx`; nothing touches disk.
#[derive(Debug, Default)]
pub struct MemoryPackageSource {
    state: Mutex<MemoryState>,
}

impl MemoryPackageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `version` the newest published version of `id`.
    pub fn publish(&self, id: &str, version: &str) {
        self.lock()
            .published
            .insert(id.to_string(), UpdateRecord::new(version));
    }

    /// Version installed by the last successful extract of `id`.
    pub fn installed_version(&self, id: &str) -> Option<String> {
        self.lock().installed.get(id).cloned()
    }

    /// Make every version query fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make version queries for `id` fail while other packages still answer.
    pub fn fail_latest_for(&self, id: &str) {
        self.lock().failing_latest.insert(id.to_string());
    }

    pub fn fail_extract_for(&self, id: &str) {
        self.lock().failing_extract.insert(id.to_string());
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn latest_calls_for(&self, id: &str) -> usize {
        self.lock().latest_calls.get(id).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn split_crx_path(path: &Path) -> Option<(String, String)> {
    let version = path.file_stem()?.to_str()?.to_string();
    let id = path.parent()?.file_name()?.to_str()?.to_string();
    Some((id, version))
}

#[async_trait]
impl PackageSource for MemoryPackageSource {
    async fn get_latest_version(&self, id: &str) -> Result<UpdateRecord, UpdaterError> {
        let result = {
            let mut state = self.lock();
            state.calls.latest += 1;
            *state.latest_calls.entry(id.to_string()).or_default() += 1;
            if state.unavailable || state.failing_latest.contains(id) {
                Err(UpdaterError::source_unavailable(format!(
                    "Version query for {} failed",
                    id
                )))
            } else {
                state.published.get(id).cloned().ok_or_else(|| {
                    UpdaterError::source_unavailable(format!("No published version of {}", id))
                })
            }
        };
        // Remote queries never answer synchronously.
        tokio::task::yield_now().await;
        result
    }

    async fn download_crx(
        &self,
        id: &str,
        record: &UpdateRecord,
    ) -> Result<PathBuf, UpdaterError> {
        self.lock().calls.download += 1;
        tokio::task::yield_now().await;
        Ok(PathBuf::from(id).join(format!("{}.crx", record.version)))
    }

    async fn extract_crx(&self, path: &Path) -> Result<(), UpdaterError> {
        let (id, version) = split_crx_path(path).ok_or_else(|| {
            UpdaterError::extract_failed(format!("Not a package path: {}", path.display()))
        })?;
        tokio::task::yield_now().await;

        let mut state = self.lock();
        state.calls.extract += 1;
        if state.failing_extract.contains(&id) {
            return Err(UpdaterError::extract_failed(format!(
                "Failed to extract {}",
                path.display()
            )));
        }
        state.installed.insert(id, version);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
