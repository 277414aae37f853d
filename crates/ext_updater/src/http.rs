//! HTTP package source.
//!
//! Layout served by the update host:
//!
//! ```text
//! <base>/<id>/latest.json        {"version": "1.2.3", "url": "...", "sha256": "..."}
//! <base>/<id>/<version>.crx      default package location when "url" is absent
//! ```
//!
//! Packages are installed unpacked under `<install_dir>/<id>/`. Each download
//! and each extraction gets its own scratch path, so overlapping cycles for the
//! same package never share files.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::crx::unpack_crx;
use crate::source::PackageSource;
use crate::{UpdateRecord, UpdaterError};

const DOWNLOAD_DIR: &str = ".downloads";

/// [`PackageSource`] that talks to a static update host.
#[derive(Debug, Clone)]
pub struct HttpPackageSource {
    client: Client,
    base_url: Url,
    install_dir: PathBuf,
}

impl HttpPackageSource {
    pub fn new(base_url: &str, install_dir: impl Into<PathBuf>) -> Result<Self, UpdaterError> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| UpdaterError::generic(format!("Invalid update URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .user_agent(concat!("crx-host/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UpdaterError::generic(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            install_dir: install_dir.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpdaterError> {
        self.base_url
            .join(path)
            .map_err(|e| UpdaterError::generic(format!("Invalid package path {}: {}", path, e)))
    }

    fn package_url(&self, id: &str, record: &UpdateRecord) -> Result<Url, UpdaterError> {
        match &record.download_url {
            Some(url) => Url::parse(url)
                .or_else(|_| self.base_url.join(url))
                .map_err(|e| UpdaterError::download_failed(format!("Invalid URL {}: {}", url, e))),
            None => self.endpoint(&format!("{}/{}.crx", id, record.version)),
        }
    }
}

fn verify_checksum(expected: &str, actual: &str) -> Result<(), UpdaterError> {
    if actual.eq_ignore_ascii_case(expected.trim()) {
        return Ok(());
    }
    Err(UpdaterError::verification_failed(format!(
        "Checksum mismatch: expected {}, got {}",
        expected, actual
    )))
}

#[async_trait]
impl PackageSource for HttpPackageSource {
    async fn get_latest_version(&self, id: &str) -> Result<UpdateRecord, UpdaterError> {
        let url = self.endpoint(&format!("{}/latest.json", id))?;
        debug!(%url, "Checking latest version");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| UpdaterError::source_unavailable(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(UpdaterError::source_unavailable(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }

        response
            .json::<UpdateRecord>()
            .await
            .map_err(|e| UpdaterError::invalid_manifest(format!("Bad version manifest: {}", e)))
    }

    async fn download_crx(
        &self,
        id: &str,
        record: &UpdateRecord,
    ) -> Result<PathBuf, UpdaterError> {
        let url = self.package_url(id, record)?;
        info!(id, version = %record.version, %url, "Downloading package");

        let downloads = self.install_dir.join(DOWNLOAD_DIR).join(id);
        tokio::fs::create_dir_all(&downloads).await.map_err(|e| {
            UpdaterError::download_failed(format!("Failed to create download dir: {}", e))
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| UpdaterError::download_failed(format!("Failed to start download: {}", e)))?;

        if !response.status().is_success() {
            return Err(UpdaterError::download_failed(format!(
                "Server returned status {}",
                response.status()
            )));
        }

        let partial = tempfile::Builder::new()
            .prefix(&format!("{}-", record.version))
            .suffix(".crx")
            .tempfile_in(&downloads)
            .map_err(|e| UpdaterError::download_failed(format!("Failed to create file: {}", e)))?;
        let handle = partial
            .reopen()
            .map_err(|e| UpdaterError::download_failed(format!("Failed to open file: {}", e)))?;
        let mut file = tokio::fs::File::from_std(handle);

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| UpdaterError::download_failed(format!("Download stream error: {}", e)))?;
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| UpdaterError::download_failed(format!("Failed to write chunk: {}", e)))?;
            downloaded += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| UpdaterError::download_failed(format!("Failed to flush file: {}", e)))?;
        drop(file);

        let actual = format!("{:x}", hasher.finalize());
        match &record.sha256 {
            Some(expected) => verify_checksum(expected, &actual)?,
            None => warn!(id, "No checksum provided, skipping verification"),
        }

        let dest = partial
            .into_temp_path()
            .keep()
            .map_err(|e| UpdaterError::download_failed(format!("Failed to save package: {}", e)))?;

        info!(id, bytes = downloaded, path = %dest.display(), "Download complete");
        Ok(dest)
    }

    async fn extract_crx(&self, path: &Path) -> Result<(), UpdaterError> {
        let id = package_id(path).ok_or_else(|| {
            UpdaterError::extract_failed(format!("Not a package path: {}", path.display()))
        })?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            UpdaterError::extract_failed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let install_dir = self.install_dir.clone();
        let target = self.install_dir.join(&id);
        let staging_prefix = format!(".staging-{}-", id);
        tokio::task::spawn_blocking(move || -> Result<(), UpdaterError> {
            std::fs::create_dir_all(&install_dir).map_err(|e| {
                UpdaterError::extract_failed(format!("Failed to create install dir: {}", e))
            })?;
            let staging = tempfile::Builder::new()
                .prefix(&staging_prefix)
                .tempdir_in(&install_dir)
                .map_err(|e| {
                    UpdaterError::extract_failed(format!("Failed to create staging dir: {}", e))
                })?;
            unpack_crx(&bytes, staging.path())?;
            install_staged(staging.path(), &target)
        })
        .await
        .map_err(|e| UpdaterError::extract_failed(format!("Extraction task failed: {}", e)))??;

        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "Could not remove downloaded package");
        }
        info!(id, dir = %self.install_dir.join(&id).display(), "Package installed");
        Ok(())
    }
}

/// Package id of a downloaded CRX: the name of its `.downloads/<id>/` directory.
fn package_id(path: &Path) -> Option<String> {
    path.parent()?.file_name()?.to_str().map(str::to_string)
}

/// Replace `target` with the unpacked tree at `staging`.
fn install_staged(staging: &Path, target: &Path) -> Result<(), UpdaterError> {
    let remove_old = || match std::fs::remove_dir_all(target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(UpdaterError::extract_failed(format!(
            "Failed to remove old package: {}",
            e
        ))),
    };

    remove_old()?;
    if std::fs::rename(staging, target).is_ok() {
        return Ok(());
    }
    // Another extraction installed the package in between.
    remove_old()?;
    std::fs::rename(staging, target)
        .map_err(|e| UpdaterError::extract_failed(format!("Failed to install package: {}", e)))
}
