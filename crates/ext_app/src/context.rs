//! Process-scoped state shared by every runtime component.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ext_ipc::RuntimeEvent;
use ext_updater::{PackageIdentity, PackageSource};
use ext_window::{WindowHandle, WindowHost};

use crate::RuntimeSettings;

/// Static configuration of one hosted app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    pub app_id: String,
    /// Packages are installed unpacked under `<install_dir>/<id>/`
    pub install_dir: PathBuf,
    /// Directory holding `<app_id>.json`
    pub user_data_dir: PathBuf,
    /// Separately versioned runtime the app depends on
    pub runtime_package: Option<PackageIdentity>,
    pub settings: RuntimeSettings,
}

impl ProcessConfig {
    pub fn new(
        app_id: impl Into<String>,
        install_dir: impl Into<PathBuf>,
        user_data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            install_dir: install_dir.into(),
            user_data_dir: user_data_dir.into(),
            runtime_package: None,
            settings: RuntimeSettings::default(),
        }
    }

    pub fn with_runtime_package(mut self, runtime: PackageIdentity) -> Self {
        self.runtime_package = Some(runtime);
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Everything a component needs to know about the running process.
///
/// One instance exists per shell window; components receive it by `Arc`.
pub struct ProcessContext {
    config: ProcessConfig,
    host: Arc<dyn WindowHost>,
    source: Arc<dyn PackageSource>,
    shell_window: WindowHandle,
    on_activate: RuntimeEvent<()>,
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("config", &self.config)
            .field("shell_window", &self.shell_window)
            .finish_non_exhaustive()
    }
}

impl ProcessContext {
    pub fn new(
        config: ProcessConfig,
        host: Arc<dyn WindowHost>,
        source: Arc<dyn PackageSource>,
        shell_window: WindowHandle,
    ) -> Self {
        Self {
            config,
            host,
            source,
            shell_window,
            on_activate: RuntimeEvent::new("app.activate"),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    pub fn install_dir(&self) -> &Path {
        &self.config.install_dir
    }

    pub fn user_data_dir(&self) -> &Path {
        &self.config.user_data_dir
    }

    pub fn runtime_package(&self) -> Option<&PackageIdentity> {
        self.config.runtime_package.as_ref()
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.config.settings
    }

    pub fn host(&self) -> &Arc<dyn WindowHost> {
        &self.host
    }

    pub fn source(&self) -> &Arc<dyn PackageSource> {
        &self.source
    }

    /// The window the runtime itself runs in.
    pub fn shell_window(&self) -> &WindowHandle {
        &self.shell_window
    }

    /// Application-level "activate", fired when a reload closed visible windows.
    pub fn on_activate(&self) -> &RuntimeEvent<()> {
        &self.on_activate
    }
}
