//! `chrome.runtime` as seen by app code.

use std::fmt;
use std::sync::Arc;

use ext_ipc::{RuntimeEvent, RuntimeMessage};
use ext_storage::PersistentStore;
use ext_sys::PlatformInfo;
use ext_updater::{UpdateCheckStatus, UpdateCoordinator, UpdateDetails};
use serde_json::Value;
use tracing::error;

use crate::background::BackgroundManager;
use crate::context::ProcessContext;
use crate::lifecycle::LifecycleController;
use crate::{AppError, AppManifest};

pub struct ChromeRuntime {
    ctx: Arc<ProcessContext>,
    manifest: AppManifest,
    store: Arc<PersistentStore>,
    updates: Arc<UpdateCoordinator>,
    background: Arc<BackgroundManager>,
    lifecycle: Arc<LifecycleController>,
    on_message: RuntimeEvent<RuntimeMessage>,
    on_message_external: RuntimeEvent<RuntimeMessage>,
}

impl fmt::Debug for ChromeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChromeRuntime")
            .field("id", &self.id())
            .field("version", &self.manifest.version)
            .finish_non_exhaustive()
    }
}

impl ChromeRuntime {
    pub(crate) fn new(
        ctx: Arc<ProcessContext>,
        manifest: AppManifest,
        store: Arc<PersistentStore>,
        updates: Arc<UpdateCoordinator>,
        background: Arc<BackgroundManager>,
        lifecycle: Arc<LifecycleController>,
    ) -> Self {
        Self {
            ctx,
            manifest,
            store,
            updates,
            background,
            lifecycle,
            on_message: RuntimeEvent::new("runtime.onMessage"),
            on_message_external: RuntimeEvent::new("runtime.onMessageExternal"),
        }
    }

    /// `chrome.runtime.id`
    pub fn id(&self) -> &str {
        self.ctx.app_id()
    }

    /// `chrome.runtime.getManifest()`
    pub fn manifest(&self) -> &AppManifest {
        &self.manifest
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.ctx
    }

    /// Backing store for `localStorage`.
    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn updates(&self) -> &Arc<UpdateCoordinator> {
        &self.updates
    }

    pub fn background(&self) -> &Arc<BackgroundManager> {
        &self.background
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn on_message(&self) -> &RuntimeEvent<RuntimeMessage> {
        &self.on_message
    }

    pub fn on_message_external(&self) -> &RuntimeEvent<RuntimeMessage> {
        &self.on_message_external
    }

    pub fn on_update_available(&self) -> &RuntimeEvent<UpdateDetails> {
        self.updates.on_update_available()
    }

    /// `chrome.runtime.sendMessage`. There is no message routing; the message is dropped.
    pub fn send_message(&self, message: &Value) {
        error!(app = %self.id(), %message, "dropping message on the floor");
    }

    /// `chrome.runtime.requestUpdateCheck(callback)`
    pub async fn request_update_check<F>(&self, callback: F)
    where
        F: FnOnce(UpdateCheckStatus, UpdateDetails),
    {
        self.updates.request_update_check(callback).await;
    }

    /// Awaitable form of [`ChromeRuntime::request_update_check`].
    pub async fn update_check(&self) -> (UpdateCheckStatus, UpdateDetails) {
        self.updates.update_check().await
    }

    /// `chrome.runtime.reload()`
    pub fn reload(&self) -> Result<(), AppError> {
        self.lifecycle.reload()
    }

    /// `chrome.runtime.getPlatformInfo()`
    pub fn get_platform_info(&self) -> PlatformInfo {
        ext_sys::platform_info()
    }
}
