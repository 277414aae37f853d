//! Update Coordinator - periodic polling of the package source.
//!
//! Each poll cycle checks the runtime package (when one is configured) and then
//! the application package. The cycle is published as a [`PendingUpdate`], a
//! shared future that any number of callers may await; starting a new cycle
//! replaces it without aborting the old one. Only one polling loop exists at a
//! time.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ext_ipc::RuntimeEvent;
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::source::{check_for_update, PackageSource};
use crate::{PackageIdentity, UpdateRecord, UpdaterError};

/// Interval between poll cycles when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30 * 60);

const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Status passed to `requestUpdateCheck` callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateCheckStatus {
    NoUpdate,
    UpdateAvailable,
}

impl UpdateCheckStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoUpdate => "no_update",
            Self::UpdateAvailable => "update_available",
        }
    }
}

impl fmt::Display for UpdateCheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details passed alongside an [`UpdateCheckStatus`] and to `onUpdateAvailable`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDetails {
    /// Empty when there is no update
    pub version: String,
}

/// Result of one completed poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOutcome {
    runtime_update: Option<UpdateRecord>,
    application_update: Option<UpdateRecord>,
    reported_version: Option<String>,
}

impl PollOutcome {
    /// Runtime package installed during the cycle.
    pub fn runtime_update(&self) -> Option<&UpdateRecord> {
        self.runtime_update.as_ref()
    }

    /// Application package installed during the cycle.
    pub fn application_update(&self) -> Option<&UpdateRecord> {
        self.application_update.as_ref()
    }

    /// Version reported to `requestUpdateCheck`.
    ///
    /// A runtime-only update reports the application's *current* version, so
    /// the app is told to reload into the new runtime without a content change.
    pub fn reported_version(&self) -> Option<&str> {
        self.reported_version.as_deref()
    }
}

type CycleResult = Result<PollOutcome, UpdaterError>;

/// Shared, re-awaitable result of the most recent poll cycle.
pub type PendingUpdate = Shared<BoxFuture<'static, CycleResult>>;

/// Snapshot of coordinator activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterStatus {
    pub polling: bool,
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub last_outcome: Option<PollOutcome>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct CycleStats {
    started: u64,
    completed: u64,
    /// Sequence number of the cycle whose result is recorded below
    recorded: u64,
    last_outcome: Option<PollOutcome>,
    last_error: Option<String>,
}

/// Polling loop owned by the coordinator; cancelled when dropped.
struct PollTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.token.cancel();
        self.handle.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct UpdateCoordinator {
    source: Arc<dyn PackageSource>,
    application: PackageIdentity,
    runtime: Option<PackageIdentity>,
    on_update_available: RuntimeEvent<UpdateDetails>,
    pending: Mutex<PendingUpdate>,
    poller: Mutex<Option<PollTask>>,
    announced: Mutex<Option<String>>,
    stats: Arc<Mutex<CycleStats>>,
}

impl fmt::Debug for UpdateCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateCoordinator")
            .field("application", &self.application)
            .field("runtime", &self.runtime)
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}

impl UpdateCoordinator {
    pub fn new(
        source: Arc<dyn PackageSource>,
        application: PackageIdentity,
        runtime: Option<PackageIdentity>,
    ) -> Self {
        let idle: BoxFuture<'static, CycleResult> = future::ready(Ok(PollOutcome::default())).boxed();
        Self {
            source,
            application,
            runtime,
            on_update_available: RuntimeEvent::new("runtime.onUpdateAvailable"),
            pending: Mutex::new(idle.shared()),
            poller: Mutex::new(None),
            announced: Mutex::new(None),
            stats: Arc::new(Mutex::new(CycleStats::default())),
        }
    }

    pub fn application(&self) -> &PackageIdentity {
        &self.application
    }

    pub fn runtime(&self) -> Option<&PackageIdentity> {
        self.runtime.as_ref()
    }

    /// `chrome.runtime.onUpdateAvailable`
    pub fn on_update_available(&self) -> &RuntimeEvent<UpdateDetails> {
        &self.on_update_available
    }

    /// Start one poll cycle and make it the pending update.
    ///
    /// The cycle runs on its own task, so it completes even if nobody awaits
    /// the returned future. Must be called inside a tokio runtime.
    pub fn poll_cycle(&self) -> PendingUpdate {
        let seq = {
            let mut stats = lock(&self.stats);
            stats.started += 1;
            stats.started
        };

        let source = self.source.clone();
        let application = self.application.clone();
        let runtime = self.runtime.clone();
        let stats = self.stats.clone();

        let cycle: BoxFuture<'static, CycleResult> = async move {
            let (result, runtime_error) =
                run_cycle(source.as_ref(), &application, runtime.as_ref()).await;
            record_cycle(&stats, seq, &result, runtime_error.as_ref());
            result
        }
        .boxed();
        let pending = cycle.shared();

        *lock(&self.pending) = pending.clone();
        tokio::spawn(pending.clone().map(|_| ()));
        pending
    }

    /// Poll now and then every `interval`, replacing any active loop.
    pub fn start_polling(self: &Arc<Self>, interval: Duration) {
        let interval = if interval < MIN_POLL_INTERVAL {
            warn!(?interval, "Poll interval too short, using {:?}", MIN_POLL_INTERVAL);
            MIN_POLL_INTERVAL
        } else {
            interval
        };

        let mut poller = lock(&self.poller);
        if poller.take().is_some() {
            debug!("Cancelled previous polling loop");
        }

        self.poll_cycle();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(self);
        let first_tick = Instant::now() + interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(coordinator) = weak.upgrade() else { break };
                        coordinator.poll_cycle();
                    }
                }
            }
        });

        *poller = Some(PollTask { token, handle });
        info!(app = %self.application.id, ?interval, "Update polling started");
    }

    pub fn stop_polling(&self) {
        if lock(&self.poller).take().is_some() {
            info!(app = %self.application.id, "Update polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poller).is_some()
    }

    /// The most recent poll cycle.
    pub fn pending_update(&self) -> PendingUpdate {
        lock(&self.pending).clone()
    }

    /// Await the pending update and answer as `requestUpdateCheck` does.
    ///
    /// Failed cycles answer `no_update`. A detected version is announced on
    /// `onUpdateAvailable` the first time it is reported.
    pub async fn update_check(&self) -> (UpdateCheckStatus, UpdateDetails) {
        let outcome = match self.pending_update().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Update check failed, reporting no update");
                return (UpdateCheckStatus::NoUpdate, UpdateDetails::default());
            }
        };

        match outcome.reported_version {
            None => (UpdateCheckStatus::NoUpdate, UpdateDetails::default()),
            Some(version) => {
                let details = UpdateDetails { version };
                self.announce(&details);
                (UpdateCheckStatus::UpdateAvailable, details)
            }
        }
    }

    /// `chrome.runtime.requestUpdateCheck(callback)`
    pub async fn request_update_check<F>(&self, callback: F)
    where
        F: FnOnce(UpdateCheckStatus, UpdateDetails),
    {
        let (status, details) = self.update_check().await;
        callback(status, details);
    }

    pub fn status(&self) -> UpdaterStatus {
        let polling = self.is_polling();
        let stats = lock(&self.stats);
        UpdaterStatus {
            polling,
            cycles_started: stats.started,
            cycles_completed: stats.completed,
            last_outcome: stats.last_outcome.clone(),
            last_error: stats.last_error.clone(),
        }
    }

    fn announce(&self, details: &UpdateDetails) {
        {
            let mut announced = lock(&self.announced);
            if announced.as_deref() == Some(details.version.as_str()) {
                return;
            }
            *announced = Some(details.version.clone());
        }
        let listeners = self.on_update_available.invoke_listeners(details);
        debug!(version = %details.version, listeners, "runtime.onUpdateAvailable");
    }
}

/// Run one cycle. A failed runtime check is returned alongside the result and
/// does not stop the application check.
async fn run_cycle(
    source: &dyn PackageSource,
    application: &PackageIdentity,
    runtime: Option<&PackageIdentity>,
) -> (CycleResult, Option<UpdaterError>) {
    let mut outcome = PollOutcome::default();
    let mut runtime_error = None;

    match runtime {
        Some(runtime) => {
            info!(id = %runtime.id, "checking for updates to chrome runtime");
            match check_for_update(source, &runtime.id, &runtime.version).await {
                Ok(Some(record)) => {
                    info!(id = %runtime.id, version = %record.version, "found update for chrome runtime");
                    outcome.reported_version = Some(application.version.clone());
                    outcome.runtime_update = Some(record);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(id = %runtime.id, error = %e, "Runtime update check failed, checking app");
                    runtime_error = Some(e);
                }
            }
        }
        None => info!(id = %application.id, "checking for updates to chrome app"),
    }

    let result = check_for_update(source, &application.id, &application.version)
        .await
        .map(|found| {
            if let Some(record) = found {
                info!(id = %application.id, version = %record.version, "found update for chrome app");
                outcome.reported_version = Some(record.version.clone());
                outcome.application_update = Some(record);
            }
            outcome
        });
    (result, runtime_error)
}

fn record_cycle(
    stats: &Mutex<CycleStats>,
    seq: u64,
    result: &CycleResult,
    runtime_error: Option<&UpdaterError>,
) {
    let mut stats = lock(stats);
    stats.completed += 1;
    if let Err(e) = result {
        warn!(error = %e, "Update poll failed, retrying on next tick");
    }
    // A superseded cycle that finishes late does not overwrite a newer result.
    if seq < stats.recorded {
        return;
    }
    stats.recorded = seq;
    match result {
        Ok(outcome) => {
            stats.last_outcome = Some(outcome.clone());
            stats.last_error = runtime_error.map(ToString::to_string);
        }
        Err(e) => stats.last_error = Some(e.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryPackageSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const INTERVAL: Duration = Duration::from_secs(60);

    fn coordinator(
        source: &Arc<MemoryPackageSource>,
        app_version: &str,
        runtime: Option<PackageIdentity>,
    ) -> Arc<UpdateCoordinator> {
        Arc::new(UpdateCoordinator::new(
            source.clone(),
            PackageIdentity::new("app", app_version),
            runtime,
        ))
    }

    #[tokio::test]
    async fn test_pending_update_before_first_cycle() {
        let source = Arc::new(MemoryPackageSource::new());
        let coordinator = coordinator(&source, "1.0", None);

        let (status, details) = coordinator.update_check().await;
        assert_eq!(status, UpdateCheckStatus::NoUpdate);
        assert_eq!(details.version, "");
        assert_eq!(source.calls().latest, 0);
    }

    #[tokio::test]
    async fn test_poll_cycle_application_update() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("app", "2.0");
        let coordinator = coordinator(&source, "1.0", None);

        let pending = coordinator.poll_cycle();
        let outcome = pending.clone().await.unwrap();
        assert_eq!(outcome.application_update().map(|r| r.version.as_str()), Some("2.0"));
        assert_eq!(outcome.reported_version(), Some("2.0"));
        assert_eq!(source.installed_version("app"), Some("2.0".to_string()));

        // Re-awaitable: the same cycle result, no new query.
        assert_eq!(pending.await.unwrap(), outcome);
        assert_eq!(source.calls().latest, 1);

        let (status, details) = coordinator.update_check().await;
        assert_eq!(status, UpdateCheckStatus::UpdateAvailable);
        assert_eq!(details.version, "2.0");
    }

    #[tokio::test]
    async fn test_poll_cycle_no_update_when_not_newer() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("app", "1.0");
        let coordinator = coordinator(&source, "1.0", None);

        let outcome = coordinator.poll_cycle().await.unwrap();
        assert_eq!(outcome, PollOutcome::default());
        assert_eq!(source.calls().download, 0);
    }

    /// Documented quirk: a runtime-only update reports the application's
    /// current version as the available update.
    #[tokio::test]
    async fn test_runtime_update_reports_current_app_version() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("runtime", "2.0");
        source.publish("app", "1.0");
        let coordinator = coordinator(&source, "1.0", Some(PackageIdentity::new("runtime", "1.0")));

        let outcome = coordinator.poll_cycle().await.unwrap();
        assert_eq!(outcome.runtime_update().map(|r| r.version.as_str()), Some("2.0"));
        assert_eq!(outcome.application_update(), None);
        assert_eq!(outcome.reported_version(), Some("1.0"));
        assert_eq!(source.installed_version("runtime"), Some("2.0".to_string()));
        assert_eq!(source.latest_calls_for("app"), 1);

        let (status, details) = coordinator.update_check().await;
        assert_eq!(status, UpdateCheckStatus::UpdateAvailable);
        assert_eq!(details.version, "1.0");
    }

    #[tokio::test]
    async fn test_application_update_wins_over_runtime_update() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("runtime", "2.0");
        source.publish("app", "1.5");
        let coordinator = coordinator(&source, "1.0", Some(PackageIdentity::new("runtime", "1.0")));

        let outcome = coordinator.poll_cycle().await.unwrap();
        assert!(outcome.runtime_update().is_some());
        assert_eq!(outcome.reported_version(), Some("1.5"));
    }

    #[tokio::test]
    async fn test_runtime_failure_still_checks_application() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("runtime", "2.0");
        source.publish("app", "2.0");
        source.fail_latest_for("runtime");
        let coordinator = coordinator(&source, "1.0", Some(PackageIdentity::new("runtime", "1.0")));

        let outcome = coordinator.poll_cycle().await.unwrap();
        assert_eq!(outcome.runtime_update(), None);
        assert_eq!(outcome.application_update().map(|r| r.version.as_str()), Some("2.0"));
        assert_eq!(outcome.reported_version(), Some("2.0"));
        assert_eq!(source.latest_calls_for("app"), 1);
        assert_eq!(source.installed_version("app"), Some("2.0".to_string()));

        let (status, details) = coordinator.update_check().await;
        assert_eq!(status, UpdateCheckStatus::UpdateAvailable);
        assert_eq!(details.version, "2.0");

        let status = coordinator.status();
        assert!(status.last_outcome.is_some());
        assert!(status.last_error.unwrap().contains("runtime"));
    }

    #[tokio::test]
    async fn test_failed_cycle_collapses_to_no_update() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("app", "2.0");
        source.set_unavailable(true);
        let coordinator = coordinator(&source, "1.0", None);

        let err = coordinator.poll_cycle().await.unwrap_err();
        assert!(matches!(err, UpdaterError::SourceUnavailable { .. }));

        let mut answer = None;
        coordinator
            .request_update_check(|status, details| answer = Some((status, details)))
            .await;
        assert_eq!(
            answer,
            Some((UpdateCheckStatus::NoUpdate, UpdateDetails::default()))
        );

        let status = coordinator.status();
        assert_eq!(status.cycles_completed, 1);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_on_update_available_fires_once_per_version() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("app", "2.0");
        let coordinator = coordinator(&source, "1.0", None);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        coordinator.on_update_available().add_listener(move |details: &UpdateDetails| {
            assert!(!details.version.is_empty());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.poll_cycle().await.unwrap();
        coordinator.update_check().await;
        coordinator.update_check().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        source.publish("app", "3.0");
        coordinator.poll_cycle().await.unwrap();
        coordinator.update_check().await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_start_polling_runs_immediately_then_on_interval() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("app", "1.0");
        let coordinator = coordinator(&source, "1.0", None);

        coordinator.start_polling(INTERVAL);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(source.latest_calls_for("app"), 1);
        assert!(coordinator.is_polling());

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(source.latest_calls_for("app"), 4);

        coordinator.stop_polling();
        assert!(!coordinator.is_polling());
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(source.latest_calls_for("app"), 4);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_restart_polling_keeps_single_loop() {
        let source = Arc::new(MemoryPackageSource::new());
        source.publish("app", "1.0");
        let coordinator = coordinator(&source, "1.0", None);

        coordinator.start_polling(INTERVAL);
        coordinator.start_polling(INTERVAL);
        tokio::time::sleep(Duration::from_millis(1)).await;
        // One immediate cycle per start.
        assert_eq!(source.latest_calls_for("app"), 2);

        const N: u32 = 5;
        tokio::time::sleep(INTERVAL * N).await;
        assert_eq!(source.latest_calls_for("app"), 2 + N as usize);

        let status = coordinator.status();
        assert!(status.polling);
        assert_eq!(status.cycles_started, 2 + N as u64);
        assert_eq!(status.cycles_completed, 2 + N as u64);
    }
}
