//! `crx-host.toml`
//!
//! ```toml
//! [app]
//! id = "abcdefghijklmnop"
//! # install_dir = "/opt/crx/apps"
//! # user_data_dir = "/home/me/.local/share/crx-host/data"
//!
//! [runtime]            # optional
//! id = "runtime-id"
//! version = "1.0"
//!
//! [updates]
//! base_url = "https://updates.example.com/crx/"
//! # poll_interval_secs = 1800
//!
//! [reload]             # optional
//! delay_ms = 200
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use ext_app::{ProcessConfig, RuntimeSettings};
use ext_updater::PackageIdentity;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "crx-host.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub app: AppSection,
    pub runtime: Option<RuntimeSection>,
    pub updates: UpdatesSection,
    pub reload: Option<ReloadSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub id: String,
    pub install_dir: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeSection {
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdatesSection {
    pub base_url: String,
    pub poll_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReloadSection {
    pub delay_ms: u64,
}

fn default_root() -> PathBuf {
    ext_storage::default_user_data_dir("crx-host")
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: HostConfig = toml::from_str(text)?;
        if config.app.id.trim().is_empty() {
            anyhow::bail!("app.id must not be empty");
        }
        Ok(config)
    }

    pub fn install_dir(&self) -> PathBuf {
        self.app
            .install_dir
            .clone()
            .unwrap_or_else(|| default_root().join("apps"))
    }

    pub fn user_data_dir(&self) -> PathBuf {
        self.app
            .user_data_dir
            .clone()
            .unwrap_or_else(|| default_root().join("data"))
    }

    pub fn settings(&self) -> RuntimeSettings {
        let mut settings = RuntimeSettings::default();
        if let Some(secs) = self.updates.poll_interval_secs {
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(reload) = &self.reload {
            settings.reload_delay = Duration::from_millis(reload.delay_ms);
        }
        settings
    }

    pub fn process_config(&self) -> ProcessConfig {
        let config = ProcessConfig::new(&self.app.id, self.install_dir(), self.user_data_dir())
            .with_settings(self.settings());
        match &self.runtime {
            Some(runtime) => {
                config.with_runtime_package(PackageIdentity::new(&runtime.id, &runtime.version))
            }
            None => config,
        }
    }
}
