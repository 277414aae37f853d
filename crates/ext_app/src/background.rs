//! Background Context Manager - the singleton `__background` page.
//!
//! The background window is created hidden at a fixed size, kept alive while
//! the shell window is open, and navigated to the package's generated
//! background page. When that page finishes loading, the app is re-activated
//! if the previous shell asked for it, and update polling starts.

use std::fmt;
use std::sync::Arc;

use ext_storage::{flags, PersistentStore};
use ext_updater::UpdateCoordinator;
use ext_window::{DevToolsMode, WindowConfig, WindowHandle};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::context::ProcessContext;
use crate::AppError;

/// Window key reserved for the background page.
pub const BACKGROUND_ID: &str = "__background";

/// Page the background window loads, relative to the package root.
pub const BACKGROUND_PAGE: &str = "_generated_background_page.html";

/// `<scheme>://<app_id>/_generated_background_page.html`
pub fn background_page_uri(scheme: &str, app_id: &str) -> String {
    format!("{}://{}/{}", scheme, app_id, BACKGROUND_PAGE)
}

pub struct BackgroundManager {
    ctx: Arc<ProcessContext>,
    store: Arc<PersistentStore>,
    updates: Arc<UpdateCoordinator>,
    /// Held across the find-or-create sequence
    creating: Mutex<()>,
    ready: watch::Sender<bool>,
}

impl fmt::Debug for BackgroundManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundManager")
            .field("app_id", &self.ctx.app_id())
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

impl BackgroundManager {
    pub fn new(
        ctx: Arc<ProcessContext>,
        store: Arc<PersistentStore>,
        updates: Arc<UpdateCoordinator>,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            ctx,
            store,
            updates,
            creating: Mutex::new(()),
            ready,
        }
    }

    /// The background window, if it is open.
    pub fn background(&self) -> Option<WindowHandle> {
        self.ctx.host().find_window(BACKGROUND_ID)
    }

    /// Return the background window, creating and loading it if needed.
    ///
    /// Concurrent callers all receive the same window.
    pub async fn ensure_background(self: &Arc<Self>) -> Result<WindowHandle, AppError> {
        if let Some(existing) = self.background() {
            return Ok(existing);
        }

        let _guard = self.creating.lock().await;
        if let Some(existing) = self.background() {
            debug!(window = %existing, "background created by another caller");
            return Ok(existing);
        }

        let host = self.ctx.host();
        let settings = self.ctx.settings();
        let bg = host
            .create_window(WindowConfig {
                key: Some(BACKGROUND_ID.to_string()),
                inner_bounds: Some(settings.background_bounds),
                title: None,
                hidden: true,
            })
            .await?;
        if let Err(e) = host.hide_instead_of_close(self.ctx.shell_window(), &bg) {
            // Never leave an unloaded background window behind.
            if let Err(close) = host.close_window(&bg) {
                warn!(window = %bg, error = %close, "Failed to discard background window");
            }
            return Err(e.into());
        }

        let uri = background_page_uri(&settings.scheme, self.ctx.app_id());
        info!(window = %bg, uri = %uri, "opening background page");

        let manager = Arc::clone(self);
        let window = bg.clone();
        tokio::spawn(async move { manager.load(window, uri).await });

        if let Err(e) = host.open_devtools(&bg, DevToolsMode::Detach) {
            warn!(window = %bg, error = %e, "Failed to open background devtools");
        }
        Ok(bg)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Resolve once the background page has loaded.
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    async fn load(&self, window: WindowHandle, uri: String) {
        match self.ctx.host().load_address(&window, &uri).await {
            Ok(()) => self.on_ready(),
            Err(e) => error!(window = %window, error = %e, "background page failed to load"),
        }
    }

    /// Activate first, then poll, so activation never waits on the network.
    fn on_ready(&self) {
        info!("background onload");
        if self.store.get_flag(flags::WANTS_ACTIVATE) {
            let listeners = self.ctx.on_activate().invoke_listeners(&());
            info!(listeners, "app.activate");
        }
        self.updates.start_polling(self.ctx.settings().poll_interval);
        self.ready.send_replace(true);
    }
}

// ============================================================================
// Tests
// ============================================================================
