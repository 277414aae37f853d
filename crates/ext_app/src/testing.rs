//! Shared fixture for the lifecycle tests.

use std::path::PathBuf;
use std::sync::Arc;

use ext_updater::MemoryPackageSource;
use ext_window::{HeadlessHost, WindowHandle};
use tempfile::TempDir;

use crate::context::{ProcessConfig, ProcessContext};
use crate::{RuntimeSettings, MANIFEST_FILE};

pub(crate) const APP_ID: &str = "app";

pub(crate) struct Fixture {
    pub dir: TempDir,
    pub host: Arc<HeadlessHost>,
    pub source: Arc<MemoryPackageSource>,
    pub shell: WindowHandle,
    pub settings: RuntimeSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let host = Arc::new(HeadlessHost::new());
        let shell = host.open_shell_window("shell");
        Self {
            dir: tempfile::tempdir().unwrap(),
            host,
            source: Arc::new(MemoryPackageSource::new()),
            shell,
            settings: RuntimeSettings::default(),
        }
    }

    pub fn install_dir(&self) -> PathBuf {
        self.dir.path().join("apps")
    }

    pub fn user_data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Write an installed manifest for the app.
    pub fn install(&self, version: &str) {
        self.install_package(APP_ID, version);
    }

    pub fn install_package(&self, id: &str, version: &str) {
        let dir = self.install_dir().join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            format!(r#"{{"name": "Test App", "version": "{}"}}"#, version),
        )
        .unwrap();
    }

    /// Seed the persistent store file.
    pub fn write_store(&self, json: &str) {
        std::fs::create_dir_all(self.user_data_dir()).unwrap();
        std::fs::write(
            ext_storage::store_path(&self.user_data_dir(), APP_ID),
            json,
        )
        .unwrap();
    }

    pub fn read_store(&self) -> serde_json::Value {
        let text =
            std::fs::read_to_string(ext_storage::store_path(&self.user_data_dir(), APP_ID))
                .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    pub fn config(&self) -> ProcessConfig {
        ProcessConfig::new(APP_ID, self.install_dir(), self.user_data_dir())
            .with_settings(self.settings.clone())
    }

    pub fn context(&self) -> Arc<ProcessContext> {
        Arc::new(ProcessContext::new(
            self.config(),
            self.host.clone(),
            self.source.clone(),
            self.shell.clone(),
        ))
    }
}
