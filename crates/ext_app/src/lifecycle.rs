//! Lifecycle Controller - bootstrap and reload sequencing.
//!
//! ```text
//! Bootstrapping --(package present)--> Running --reload()--> Reloading --(delay)--> Terminated
//!       |                                                                              ^
//!       +--(package absent: download, relaunch, exit 0)--------------------------------+
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use ext_storage::{flags, PersistentStore};
use ext_updater::{PackageIdentity, UpdateCoordinator};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::background::{BackgroundManager, BACKGROUND_ID};
use crate::context::ProcessContext;
use crate::runtime::ChromeRuntime;
use crate::{AppError, AppManifest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Bootstrapping,
    Running,
    Reloading,
    Terminated,
}

/// What a successful bootstrap led to.
pub enum Bootstrap {
    /// The package was missing; it has been installed and the process relaunched.
    Relaunching,
    Running(Arc<ChromeRuntime>),
}

#[derive(Clone)]
struct Services {
    store: Arc<PersistentStore>,
    updates: Arc<UpdateCoordinator>,
}

/// Deferred shell close; aborted if dropped before it fires.
struct ShutdownTimer(JoinHandle<()>);

impl Drop for ShutdownTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct LifecycleController {
    ctx: Arc<ProcessContext>,
    state: Arc<Mutex<LifecycleState>>,
    services: Mutex<Option<Services>>,
    shutdown: Mutex<Option<ShutdownTimer>>,
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("app_id", &self.ctx.app_id())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LifecycleController {
    pub fn new(ctx: Arc<ProcessContext>) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(LifecycleState::Bootstrapping)),
            services: Mutex::new(None),
            shutdown: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.state)
    }

    fn set_state(&self, state: LifecycleState) {
        debug!(?state, "lifecycle.state");
        *lock(&self.state) = state;
    }

    /// Bring the app up, or install it and relaunch when it is missing.
    ///
    /// Any failure is fatal: there is no offline mode.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<Bootstrap, AppError> {
        let state = self.state();
        if state != LifecycleState::Bootstrapping {
            return Err(AppError::bootstrap_failed(format!(
                "cannot bootstrap while {:?}",
                state
            )));
        }
        info!(app = %self.ctx.app_id(), "chrome runtime started");

        let result = self.bring_up().await;
        match &result {
            Ok(Bootstrap::Running(_)) => self.set_state(LifecycleState::Running),
            Ok(Bootstrap::Relaunching) => self.set_state(LifecycleState::Terminated),
            Err(e) => {
                error!(error = %e, "bootstrap failed");
                self.set_state(LifecycleState::Terminated);
            }
        }
        result
    }

    async fn bring_up(self: &Arc<Self>) -> Result<Bootstrap, AppError> {
        let Some(manifest) = AppManifest::load(self.ctx.install_dir(), self.ctx.app_id())? else {
            return self.acquire_package().await;
        };

        let store = Arc::new(PersistentStore::for_app(
            self.ctx.user_data_dir(),
            self.ctx.app_id(),
        ));
        let updates = Arc::new(UpdateCoordinator::new(
            self.ctx.source().clone(),
            PackageIdentity::new(self.ctx.app_id(), manifest.version.clone()),
            self.installed_runtime(),
        ));
        let background = Arc::new(BackgroundManager::new(
            self.ctx.clone(),
            store.clone(),
            updates.clone(),
        ));

        background.ensure_background().await?;
        *lock(&self.services) = Some(Services {
            store: store.clone(),
            updates: updates.clone(),
        });
        info!(app = %self.ctx.app_id(), version = %manifest.version, "initialized");

        Ok(Bootstrap::Running(Arc::new(ChromeRuntime::new(
            self.ctx.clone(),
            manifest,
            store,
            updates,
            background,
            Arc::clone(self),
        ))))
    }

    /// The configured runtime package at the version actually installed.
    ///
    /// Falls back to the configured version when no readable manifest exists.
    fn installed_runtime(&self) -> Option<PackageIdentity> {
        let configured = self.ctx.runtime_package()?;
        match AppManifest::load(self.ctx.install_dir(), &configured.id) {
            Ok(Some(manifest)) => {
                if manifest.version != configured.version {
                    debug!(
                        id = %configured.id,
                        configured = %configured.version,
                        installed = %manifest.version,
                        "using installed runtime version"
                    );
                }
                Some(PackageIdentity::new(&configured.id, manifest.version))
            }
            Ok(None) => Some(configured.clone()),
            Err(e) => {
                warn!(id = %configured.id, error = %e, "unreadable runtime manifest, using configured version");
                Some(configured.clone())
            }
        }
    }

    async fn acquire_package(&self) -> Result<Bootstrap, AppError> {
        let app_id = self.ctx.app_id();
        info!(app = %app_id, "package not installed, downloading latest version");

        let record = self.ctx.source().download_latest_version(app_id).await?;
        info!(app = %app_id, version = %record.version, "package installed, relaunching");

        let host = self.ctx.host();
        host.relaunch_process()
            .map_err(|e| AppError::relaunch_failed(e.to_string()))?;
        host.exit_process(0);
        Ok(Bootstrap::Relaunching)
    }

    /// Close every window except the shell, record reload intent, then close
    /// the shell after the configured delay.
    pub fn reload(&self) -> Result<(), AppError> {
        {
            let mut state = lock(&self.state);
            match *state {
                LifecycleState::Running => *state = LifecycleState::Reloading,
                LifecycleState::Reloading => return Err(AppError::already_reloading()),
                other => {
                    return Err(AppError::not_running(format!(
                        "cannot reload while {:?}",
                        other
                    )))
                }
            }
        }
        info!("shutting down");

        let host = self.ctx.host();
        let shell = self.ctx.shell_window();
        let background = host.find_window(BACKGROUND_ID);

        let mut had_windows = false;
        for window in host.list_windows() {
            if &window == shell {
                continue;
            }
            if Some(&window) != background.as_ref() {
                had_windows = true;
            }
            if let Err(e) = host.close_window(&window) {
                warn!(window = %window, error = %e, "window failed to close during reload");
            }
        }

        if let Some(services) = lock(&self.services).clone() {
            services.updates.stop_polling();
            for (key, value) in [
                (flags::IS_RELOADING, true),
                (flags::WANTS_ACTIVATE, had_windows),
            ] {
                if let Err(e) = services.store.set_item(key, value) {
                    error!(key, error = %e, "failed to persist reload flag");
                }
            }
        }
        debug!(had_windows, "reload flags written");

        let host = Arc::clone(host);
        let shell = shell.clone();
        let state = Arc::clone(&self.state);
        let delay = self.ctx.settings().reload_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = host.close_window(&shell) {
                error!(window = %shell, error = %e, "failed to close shell window");
            }
            *lock(&state) = LifecycleState::Terminated;
            info!("shell closed");
        });
        *lock(&self.shutdown) = Some(ShutdownTimer(task));
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fixture, APP_ID};
    use ext_window::{WindowConfig, WindowHost};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn controller(fx: &Fixture) -> Arc<LifecycleController> {
        Arc::new(LifecycleController::new(fx.context()))
    }

    async fn running(controller: &Arc<LifecycleController>) -> Arc<ChromeRuntime> {
        match controller.bootstrap().await.unwrap() {
            Bootstrap::Running(runtime) => runtime,
            Bootstrap::Relaunching => panic!("expected a running app"),
        }
    }

    fn app_window(fx: &Fixture, key: &str) -> ext_window::WindowHandle {
        fx.host.open_window(WindowConfig {
            key: Some(key.to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_bootstrap_absent_package_relaunches_once() {
        let fx = Fixture::new();
        fx.source.publish(APP_ID, "1.0");
        let controller = controller(&fx);

        let outcome = controller.bootstrap().await.unwrap();

        assert!(matches!(outcome, Bootstrap::Relaunching));
        assert_eq!(fx.host.relaunch_count(), 1);
        assert_eq!(fx.host.exit_codes(), vec![0]);
        assert_eq!(fx.source.installed_version(APP_ID), Some("1.0".to_string()));
        assert_eq!(controller.state(), LifecycleState::Terminated);
        assert!(fx.host.find_window(BACKGROUND_ID).is_none());
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_source_unavailable() {
        let fx = Fixture::new();
        fx.source.set_unavailable(true);
        let controller = controller(&fx);

        let err = controller.bootstrap().await.err().unwrap();

        assert!(matches!(err, AppError::Updater { .. }));
        assert_eq!(fx.host.relaunch_count(), 0);
        assert!(fx.host.exit_codes().is_empty());
        assert_eq!(controller.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_bootstrap_installed_package_runs() {
        let fx = Fixture::new();
        fx.install("1.0");
        let controller = controller(&fx);

        let runtime = running(&controller).await;

        assert_eq!(controller.state(), LifecycleState::Running);
        assert_eq!(runtime.id(), APP_ID);
        assert_eq!(runtime.manifest().version, "1.0");
        assert!(fx.host.find_window(BACKGROUND_ID).is_some());
        assert_eq!(fx.source.calls().download, 0);
        assert!(controller.bootstrap().await.is_err());
    }

    #[tokio::test]
    async fn test_installed_runtime_version_is_used() {
        let fx = Fixture::new();
        fx.install("1.0");
        fx.install_package("runtime", "2.0");
        fx.source.publish("runtime", "2.0");
        fx.source.publish(APP_ID, "1.0");
        let config = fx
            .config()
            .with_runtime_package(PackageIdentity::new("runtime", "1.0"));
        let ctx = Arc::new(ProcessContext::new(
            config,
            fx.host.clone(),
            fx.source.clone(),
            fx.shell.clone(),
        ));
        let controller = Arc::new(LifecycleController::new(ctx));

        let runtime = running(&controller).await;
        runtime.background().wait_ready().await;
        let outcome = runtime.updates().pending_update().await.unwrap();

        assert_eq!(runtime.updates().runtime().map(|r| r.version.as_str()), Some("2.0"));
        assert_eq!(outcome.runtime_update(), None);
        assert_eq!(fx.source.calls().download, 0);
        let (status, _) = runtime.update_check().await;
        assert_eq!(status, ext_updater::UpdateCheckStatus::NoUpdate);
    }

    #[tokio::test]
    async fn test_runtime_without_manifest_uses_configured_version() {
        let fx = Fixture::new();
        fx.install("1.0");
        let config = fx
            .config()
            .with_runtime_package(PackageIdentity::new("runtime", "1.0"));
        let ctx = Arc::new(ProcessContext::new(
            config,
            fx.host.clone(),
            fx.source.clone(),
            fx.shell.clone(),
        ));
        let controller = Arc::new(LifecycleController::new(ctx));

        let runtime = running(&controller).await;
        assert_eq!(runtime.updates().runtime().map(|r| r.version.as_str()), Some("1.0"));
    }

    #[tokio::test]
    async fn test_reload_before_running_is_rejected() {
        let fx = Fixture::new();
        let controller = controller(&fx);
        assert!(matches!(
            controller.reload(),
            Err(AppError::NotRunning { .. })
        ));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_reload_with_only_background() {
        let fx = Fixture::new();
        fx.install("1.0");
        let controller = controller(&fx);
        let runtime = running(&controller).await;
        runtime.background().wait_ready().await;

        controller.reload().unwrap();

        assert_eq!(controller.state(), LifecycleState::Reloading);
        assert!(fx.host.find_window(BACKGROUND_ID).is_none());
        assert!(fx.host.is_open(&fx.shell));
        assert!(!runtime.updates().is_polling());

        let store = fx.read_store();
        assert_eq!(store["isReloading"], true);
        assert_eq!(store["wantsActivate"], false);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!fx.host.is_open(&fx.shell));
        assert_eq!(controller.state(), LifecycleState::Terminated);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_reload_with_open_windows_wants_activate() {
        let fx = Fixture::new();
        fx.install("1.0");
        let controller = controller(&fx);
        let _runtime = running(&controller).await;
        let main = app_window(&fx, "main");

        controller.reload().unwrap();

        assert!(!fx.host.is_open(&main));
        assert_eq!(fx.read_store()["wantsActivate"], true);

        // Shell stays open until the delay has passed.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(fx.host.is_open(&fx.shell));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fx.host.is_open(&fx.shell));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_double_reload_rejected() {
        let fx = Fixture::new();
        fx.install("1.0");
        let controller = controller(&fx);
        let _runtime = running(&controller).await;

        controller.reload().unwrap();
        assert!(matches!(
            controller.reload(),
            Err(AppError::AlreadyReloading { .. })
        ));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(fx.host.closed_windows().iter().filter(|w| **w == fx.shell).count(), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_stuck_window_does_not_block_shutdown() {
        let fx = Fixture::new();
        fx.install("1.0");
        let controller = controller(&fx);
        let _runtime = running(&controller).await;
        let stuck = app_window(&fx, "stuck");
        fx.host.fail_close_of(&stuck);

        controller.reload().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(fx.host.is_open(&stuck));
        assert!(!fx.host.is_open(&fx.shell));
        assert_eq!(controller.state(), LifecycleState::Terminated);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_reload_then_next_shell_activates() {
        let fx = Fixture::new();
        fx.install("1.0");
        fx.source.publish(APP_ID, "1.0");
        let controller = controller(&fx);
        let _runtime = running(&controller).await;
        app_window(&fx, "main");

        controller.reload().unwrap();
        fx.host.wait_closed(&fx.shell).await;

        // The outer host brings up a fresh shell against the same user data.
        let shell = fx.host.open_shell_window("shell");
        let ctx = Arc::new(ProcessContext::new(
            fx.config(),
            fx.host.clone(),
            fx.source.clone(),
            shell,
        ));
        let activations = Arc::new(AtomicUsize::new(0));
        let counter = activations.clone();
        ctx.on_activate().add_listener(move |_: &()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let next = Arc::new(LifecycleController::new(ctx));
        let runtime = running(&next).await;
        runtime.background().wait_ready().await;

        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert!(runtime.updates().is_polling());
    }
}
