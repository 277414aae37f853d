//! HeadlessHost - in-memory [`WindowHost`] with no visible UI.
//!
//! Windows are bookkeeping entries: they can be created, navigated, hidden and
//! closed, and every process-level request is recorded. In native mode,
//! relaunch and exit act on the real process, which is what `crx-host` uses.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{DevToolsMode, WindowConfig, WindowError, WindowHandle, WindowHost};

/// Bookkeeping for one headless window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessWindow {
    pub handle: WindowHandle,
    pub config: WindowConfig,
    pub visible: bool,
    /// Last address passed to `load_address`
    pub address: Option<String>,
    pub devtools: Option<DevToolsMode>,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_id: u64,
    windows: Vec<HeadlessWindow>,
    /// (owner id, target id)
    hide_rules: Vec<(String, String)>,
    closed: Vec<WindowHandle>,
    created: usize,
    relaunches: usize,
    exit_codes: Vec<i32>,
    failing_close: HashSet<String>,
    failing_load: HashSet<String>,
}

impl HeadlessState {
    fn window_mut(&mut self, id: &str) -> Result<&mut HeadlessWindow, WindowError> {
        self.windows
            .iter_mut()
            .find(|w| w.handle.id == id)
            .ok_or_else(|| WindowError::not_found(id))
    }

    fn is_open(&self, id: &str) -> bool {
        self.windows.iter().any(|w| w.handle.id == id)
    }

    fn insert(&mut self, config: WindowConfig) -> WindowHandle {
        self.next_id += 1;
        self.created += 1;
        let handle = WindowHandle {
            id: format!("win-{}", self.next_id),
            key: config.key.clone(),
        };
        self.windows.push(HeadlessWindow {
            handle: handle.clone(),
            visible: !config.hidden,
            config,
            address: None,
            devtools: None,
        });
        handle
    }
}

/// In-memory window host.
#[derive(Debug)]
pub struct HeadlessHost {
    state: Mutex<HeadlessState>,
    closed_tx: watch::Sender<u64>,
    native_process: bool,
}

impl Default for HeadlessHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessHost {
    /// Host that only records relaunch/exit requests.
    pub fn new() -> Self {
        Self::with_mode(false)
    }

    /// Host whose relaunch/exit act on the current process.
    pub fn native() -> Self {
        Self::with_mode(true)
    }

    fn with_mode(native_process: bool) -> Self {
        let (closed_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(HeadlessState::default()),
            closed_tx,
            native_process,
        }
    }

    /// Open the window the runtime itself lives in.
    pub fn open_shell_window(&self, title: &str) -> WindowHandle {
        let handle = self.lock().insert(WindowConfig {
            title: Some(title.to_string()),
            ..Default::default()
        });
        debug!(window = %handle, "headless.open_shell_window");
        handle
    }

    /// Open a plain app window synchronously.
    pub fn open_window(&self, config: WindowConfig) -> WindowHandle {
        self.lock().insert(config)
    }

    pub fn window(&self, id: &str) -> Option<HeadlessWindow> {
        self.lock().windows.iter().find(|w| w.handle.id == id).cloned()
    }

    pub fn windows(&self) -> Vec<HeadlessWindow> {
        self.lock().windows.clone()
    }

    pub fn is_open(&self, window: &WindowHandle) -> bool {
        self.lock().is_open(&window.id)
    }

    /// Number of windows ever created, shell window included.
    pub fn created_count(&self) -> usize {
        self.lock().created
    }

    pub fn closed_windows(&self) -> Vec<WindowHandle> {
        self.lock().closed.clone()
    }

    pub fn relaunch_count(&self) -> usize {
        self.lock().relaunches
    }

    pub fn exit_codes(&self) -> Vec<i32> {
        self.lock().exit_codes.clone()
    }

    /// Make every future `close_window` of this window fail.
    pub fn fail_close_of(&self, window: &WindowHandle) {
        self.lock().failing_close.insert(window.id.clone());
    }

    /// Make `load_address` fail for windows created with `key`.
    pub fn fail_load_for_key(&self, key: &str) {
        self.lock().failing_load.insert(key.to_string());
    }

    /// Close `window` the way a user would, honoring `hide_instead_of_close`.
    pub fn request_close(&self, window: &WindowHandle) -> Result<(), WindowError> {
        {
            let mut state = self.lock();
            let intercepted = state
                .hide_rules
                .iter()
                .any(|(owner, target)| target == &window.id && state.is_open(owner));
            if intercepted {
                state.window_mut(&window.id)?.visible = false;
                debug!(window = %window, "headless.close intercepted, hiding");
                return Ok(());
            }
        }
        self.close_window(window)
    }

    /// Resolve once `window` is no longer open.
    pub async fn wait_closed(&self, window: &WindowHandle) {
        let mut rx = self.closed_tx.subscribe();
        loop {
            if !self.is_open(window) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WindowHost for HeadlessHost {
    async fn create_window(&self, config: WindowConfig) -> Result<WindowHandle, WindowError> {
        // A real shell answers on a later turn of its event loop.
        tokio::task::yield_now().await;
        let handle = self.lock().insert(config);
        debug!(window = %handle, "headless.create_window");
        Ok(handle)
    }

    fn list_windows(&self) -> Vec<WindowHandle> {
        self.lock().windows.iter().map(|w| w.handle.clone()).collect()
    }

    fn close_window(&self, window: &WindowHandle) -> Result<(), WindowError> {
        let mut state = self.lock();
        if state.failing_close.contains(&window.id) {
            return Err(WindowError::generic(format!("close of {} refused", window.id)));
        }

        let index = state
            .windows
            .iter()
            .position(|w| w.handle.id == window.id)
            .ok_or_else(|| WindowError::window_closed(window.id.clone()))?;
        let removed = state.windows.remove(index);
        state
            .hide_rules
            .retain(|(owner, target)| owner != &window.id && target != &window.id);
        state.closed.push(removed.handle);
        drop(state);

        debug!(window = %window, "headless.close_window");
        self.closed_tx.send_modify(|n| *n += 1);
        Ok(())
    }

    fn hide_window(&self, window: &WindowHandle) -> Result<(), WindowError> {
        self.lock().window_mut(&window.id)?.visible = false;
        debug!(window = %window, "headless.hide_window");
        Ok(())
    }

    async fn load_address(&self, window: &WindowHandle, uri: &str) -> Result<(), WindowError> {
        {
            let mut state = self.lock();
            let fails = window
                .key
                .as_ref()
                .is_some_and(|key| state.failing_load.contains(key));
            state.window_mut(&window.id)?.address = Some(uri.to_string());
            if fails {
                return Err(WindowError::load_failed(uri, "page failed to load"));
            }
        }
        debug!(window = %window, uri, "headless.load_address");

        tokio::task::yield_now().await;
        if !self.is_open(window) {
            return Err(WindowError::window_closed(window.id.clone()));
        }
        Ok(())
    }

    fn hide_instead_of_close(
        &self,
        owner: &WindowHandle,
        target: &WindowHandle,
    ) -> Result<(), WindowError> {
        let mut state = self.lock();
        if !state.is_open(&owner.id) {
            return Err(WindowError::not_found(owner.id.clone()));
        }
        state.window_mut(&target.id)?;
        state
            .hide_rules
            .push((owner.id.clone(), target.id.clone()));
        Ok(())
    }

    fn open_devtools(&self, window: &WindowHandle, mode: DevToolsMode) -> Result<(), WindowError> {
        self.lock().window_mut(&window.id)?.devtools = Some(mode);
        debug!(window = %window, ?mode, "headless.open_devtools");
        Ok(())
    }

    fn relaunch_process(&self) -> Result<(), WindowError> {
        self.lock().relaunches += 1;
        info!("Relaunch requested");

        if !self.native_process {
            return Ok(());
        }

        let exe = std::env::current_exe()
            .map_err(|e| WindowError::relaunch_failed(format!("Executable path not available: {}", e)))?;
        std::process::Command::new(&exe)
            .args(std::env::args_os().skip(1))
            .spawn()
            .map_err(|e| WindowError::relaunch_failed(e.to_string()))?;
        Ok(())
    }

    fn exit_process(&self, code: i32) {
        self.lock().exit_codes.push(code);
        info!("Exit requested with code: {}", code);

        if self.native_process {
            std::process::exit(code);
        }
        warn!("Recording host, process keeps running");
    }
}

// ============================================================================
// Tests
// ============================================================================
