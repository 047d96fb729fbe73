//! Dispatcher - schedule-driven transfer loop
//!
//! The [`Dispatcher`] asks the repository for the next due schedule item,
//! sleeps until it is due and hands the run to a background task. Manual
//! runs ("start now") bypass the schedule and may overlap scheduled ones.
//!
//! ## Flow
//!
//! ```text
//!   start() ──→ PollingSchedule ──get_next_sync──┬─ None ──→ Stopped
//!                 ▲        ▲                     ├─ Err ───→ ErrorBackoff ──┐
//!                 │        │ refractory          └─ item                   │
//!                 │        └──── same fingerprint ───┤                      │
//!                 │                                  ▼                      │
//!                 │                          SleepingUntilDue               │
//!                 │                                  │ due (not rollover)   │
//!                 └──────────── run spawned ◀────────┘                      │
//!                 └─────────────────────────── cooldown elapsed ◀───────────┘
//! ```
//!
//! ## Design Notes
//!
//! - Each loop owns a `CancellationToken`; `stop()` cancels it, which also
//!   cuts its sleeps short. A loop that was stopped never dispatches, even
//!   if `start()` runs again before it notices.
//! - The last dispatched fingerprint (schedule id + due time) lives on the
//!   dispatcher, not the loop, so one due item dispatches at most once
//!   across polls, backoff restarts and stop/start cycles.
//! - Runs are spawned on a `TaskTracker`; `shutdown()` waits on it.
//! - A run never takes the loop down: every failure becomes a status event.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use filebridge_core::config::DispatcherConfig;
use filebridge_core::domain::{
    Direction, Endpoint, FileEntry, Fingerprint, NextSync, RunTag, SyncResult, TransferredFile,
};
use filebridge_core::ports::{ITransferRepository, ITransportFactory, StatusKind};

use crate::context::SyncContext;
use crate::qualifier::{DuplicateLookup, FileQualifier, RepositoryLookup};
use crate::session::TransferSession;

// ============================================================================
// DispatcherState
// ============================================================================

/// Observable state of the scheduling loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatcherState {
    /// Constructed, never started
    Idle,
    /// Reading the next due item
    PollingSchedule,
    /// Waiting for the due time (or a refractory pause)
    SleepingUntilDue,
    /// A scheduled run is executing
    RunningTransfer,
    /// Cooling down after the schedule could not be read
    ErrorBackoff,
    /// Loop finished
    Stopped,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Runs transfers when schedules fall due, and on demand
///
/// Cheap to clone; clones share the same loop.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    repo: Arc<dyn ITransferRepository>,
    factory: Arc<dyn ITransportFactory>,
    ctx: SyncContext,
    timing: DispatcherConfig,
    lookup: RepositoryLookup,
    /// Loop running
    running: AtomicBool,
    /// Progress flag of scheduled runs
    scheduled_running: Arc<AtomicBool>,
    /// Progress flag of manual runs
    manual_running: Arc<AtomicBool>,
    scheduled_active: AtomicUsize,
    manual_active: AtomicUsize,
    counter: Arc<AtomicU64>,
    /// Token of the current loop
    loop_token: Mutex<Option<CancellationToken>>,
    /// Last item handed to a run
    dispatched: Mutex<Option<Fingerprint>>,
    state: Mutex<DispatcherState>,
    tracker: TaskTracker,
}

impl Dispatcher {
    /// Creates an idle dispatcher
    pub fn new(
        repo: Arc<dyn ITransferRepository>,
        factory: Arc<dyn ITransportFactory>,
        ctx: SyncContext,
        timing: DispatcherConfig,
    ) -> Self {
        let lookup = RepositoryLookup::new(Arc::clone(&repo), ctx.instance_id, ctx.notifier.clone());
        Self {
            inner: Arc::new(Inner {
                repo,
                factory,
                ctx,
                timing,
                lookup,
                running: AtomicBool::new(false),
                scheduled_running: Arc::new(AtomicBool::new(false)),
                manual_running: Arc::new(AtomicBool::new(false)),
                scheduled_active: AtomicUsize::new(0),
                manual_active: AtomicUsize::new(0),
                counter: Arc::new(AtomicU64::new(0)),
                loop_token: Mutex::new(None),
                dispatched: Mutex::new(None),
                state: Mutex::new(DispatcherState::Idle),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Starts the scheduling loop on a background task
    ///
    /// Resets the transferred-file counter. Calling it while the loop is
    /// already running has no effect.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("Dispatcher already running");
            return;
        }
        self.inner.counter.store(0, Ordering::Release);
        self.inner.scheduled_running.store(true, Ordering::Release);
        self.inner.set_state(DispatcherState::PollingSchedule);
        info!(instance = %self.inner.ctx.instance_id, "Starting transfer dispatcher");

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.replace_loop_token(Some(token.clone())) {
            previous.cancel();
        }
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { inner.schedule_loop(token).await });
    }

    /// Starts a manual run for `endpoint` on a background task
    pub fn start_now(&self, endpoint: Endpoint) {
        self.inner.manual_running.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move { inner.manual_run(endpoint).await });
    }

    /// Runs a manual transfer for `endpoint` and waits for it to finish
    pub async fn run_now(&self, endpoint: Endpoint) {
        self.inner.manual_running.store(true, Ordering::Release);
        Arc::clone(&self.inner).manual_run(endpoint).await;
    }

    /// Stops the loop and interrupts running transfers between files
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.scheduled_running.store(false, Ordering::Release);
        self.inner.manual_running.store(false, Ordering::Release);
        if let Some(token) = self.inner.replace_loop_token(None) {
            token.cancel();
            self.inner.set_state(DispatcherState::Stopped);
        }
        self.inner.ctx.notifier.info(format!(
            "Transfer service stopped, {} file(s) transferred",
            self.files_transferred()
        ));
    }

    /// Stops and waits for the loop and every in-flight run
    pub async fn shutdown(&self) {
        self.stop();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
        debug!("Dispatcher shut down");
    }

    /// Repository duplicate check; errors are reported and yield `false`
    pub async fn check_database(&self, name: &str, size: u64, modified: DateTime<Utc>) -> bool {
        self.inner.lookup.check(name, size, modified).await
    }

    /// Files transferred since the last `start()`
    pub fn files_transferred(&self) -> u64 {
        self.inner.counter.load(Ordering::Acquire)
    }

    /// The transferred-file counter, for components that transfer on their own
    pub fn transfer_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.inner.counter)
    }

    /// Current loop state
    pub fn state(&self) -> DispatcherState {
        let state = self.inner.current_state();
        let busy = self.inner.scheduled_active.load(Ordering::Acquire) > 0;
        match state {
            DispatcherState::PollingSchedule | DispatcherState::SleepingUntilDue if busy => {
                DispatcherState::RunningTransfer
            }
            other => other,
        }
    }

    /// True while the scheduling loop runs
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// True while at least one manual run executes
    pub fn manual_in_progress(&self) -> bool {
        self.inner.manual_active.load(Ordering::Acquire) > 0
    }
}

#[async_trait::async_trait]
impl DuplicateLookup for Dispatcher {
    async fn already_transferred(&self, entry: &FileEntry) -> bool {
        self.check_database(&entry.name, entry.size, entry.modified)
            .await
    }
}

// ============================================================================
// Loop
// ============================================================================

impl Inner {
    fn set_state(&self, state: DispatcherState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = state;
        }
    }

    fn current_state(&self) -> DispatcherState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(DispatcherState::Stopped)
    }

    /// Loop state update; ignored once the loop has been stopped
    fn set_loop_state(&self, token: &CancellationToken, state: DispatcherState) {
        if !token.is_cancelled() {
            self.set_state(state);
        }
    }

    fn replace_loop_token(&self, token: Option<CancellationToken>) -> Option<CancellationToken> {
        match self.loop_token.lock() {
            Ok(mut slot) => std::mem::replace(&mut *slot, token),
            Err(_) => None,
        }
    }

    fn was_dispatched(&self, fingerprint: &Fingerprint) -> bool {
        self.dispatched
            .lock()
            .map(|last| last.as_ref() == Some(fingerprint))
            .unwrap_or(false)
    }

    /// Records `fingerprint` as dispatched; false if it already was
    fn claim(&self, fingerprint: Fingerprint) -> bool {
        let Ok(mut last) = self.dispatched.lock() else {
            return false;
        };
        if *last == Some(fingerprint) {
            return false;
        }
        *last = Some(fingerprint);
        true
    }

    /// Sleeps for `duration` unless cancelled; returns false when cancelled
    async fn pause(&self, token: &CancellationToken, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = token.cancelled() => false,
        }
    }

    async fn schedule_loop(self: Arc<Self>, token: CancellationToken) {
        let notifier = &self.ctx.notifier;

        while !token.is_cancelled() {
            self.set_loop_state(&token, DispatcherState::PollingSchedule);

            let item = match self.repo.get_next_sync(self.ctx.instance_id).await {
                Ok(Some(item)) => item,
                Ok(None) => {
                    notifier.info("No transfer schedule configured, dispatcher stops");
                    break;
                }
                Err(e) => {
                    notifier.error(format!("Cannot read the transfer schedule: {e:#}"));
                    let backoff = self.timing.error_backoff();
                    notifier.warning(format!(
                        "Schedule unavailable, waiting {} before retrying",
                        describe_duration(backoff)
                    ));
                    self.set_loop_state(&token, DispatcherState::ErrorBackoff);
                    self.pause(&token, backoff).await;
                    continue;
                }
            };

            let fingerprint = item.fingerprint();
            if self.was_dispatched(&fingerprint) {
                self.set_loop_state(&token, DispatcherState::SleepingUntilDue);
                self.pause(&token, self.timing.refractory()).await;
                continue;
            }

            let due = item.due();
            let message = match &item {
                NextSync::Scheduled { name, .. } => {
                    format!("Next transfer '{}' at {}", name, due.format("%Y-%m-%d %H:%M"))
                }
                NextSync::Rollover { .. } => format!(
                    "Nothing scheduled before week rollover at {}",
                    due.format("%Y-%m-%d %H:%M")
                ),
            };
            notifier.status(StatusKind::NextSyncInfo, message);

            self.set_loop_state(&token, DispatcherState::SleepingUntilDue);
            let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            if !wait.is_zero() && !self.pause(&token, wait).await {
                break;
            }
            if token.is_cancelled() || !self.claim(fingerprint) {
                continue;
            }
            self.dispatch(item, due);
        }

        if !token.is_cancelled() {
            self.running.store(false, Ordering::Release);
            self.set_state(DispatcherState::Stopped);
        }
        info!("Dispatcher loop finished");
    }

    /// Hands a due item to a background run; rollover items only wake the loop
    fn dispatch(self: &Arc<Self>, item: NextSync, due: DateTime<Utc>) {
        if let NextSync::Scheduled { schedule_id, .. } = item {
            let inner = Arc::clone(self);
            self.tracker.spawn(async move {
                inner
                    .execute_run(RunTag::Scheduled(schedule_id), None, due)
                    .await
            });
        }
    }

    async fn manual_run(self: Arc<Self>, endpoint: Endpoint) {
        self.manual_active.fetch_add(1, Ordering::AcqRel);
        let tag = RunTag::Manual(endpoint.id);
        self.execute_run(tag, Some(endpoint), Utc::now()).await;
        self.manual_active.fetch_sub(1, Ordering::AcqRel);
    }

    // ========================================================================
    // Run execution
    // ========================================================================

    async fn execute_run(
        &self,
        tag: RunTag,
        endpoint: Option<Endpoint>,
        run_time: DateTime<Utc>,
    ) {
        let scheduled = !tag.is_manual();
        if scheduled {
            self.scheduled_active.fetch_add(1, Ordering::AcqRel);
        }
        self.run_directions(tag, endpoint, run_time).await;
        if scheduled {
            self.scheduled_active.fetch_sub(1, Ordering::AcqRel);
        }
    }

    async fn run_directions(
        &self,
        tag: RunTag,
        endpoint: Option<Endpoint>,
        run_time: DateTime<Utc>,
    ) {
        let notifier = &self.ctx.notifier;

        let endpoint = match (endpoint, tag) {
            (Some(endpoint), _) => endpoint,
            (None, RunTag::Scheduled(schedule_id)) => {
                match self.repo.select_endpoint(schedule_id).await {
                    Ok(Some(endpoint)) => endpoint,
                    Ok(None) => {
                        notifier.error(format!("No endpoint bound to schedule {schedule_id}"));
                        return;
                    }
                    Err(e) => {
                        notifier.error(format!(
                            "Cannot load endpoint of schedule {schedule_id}: {e:#}"
                        ));
                        return;
                    }
                }
            }
            (None, other) => {
                notifier.error(format!("No endpoint bound to run {}", other.as_i64()));
                return;
            }
        };

        let lookup: Arc<dyn DuplicateLookup> = Arc::new(self.lookup.clone());
        let qualifier = match FileQualifier::new(
            self.ctx.settings.policy,
            endpoint.last_sync,
            Some(lookup),
        ) {
            Ok(q) => q,
            Err(e) => {
                notifier.error(e.to_string());
                return;
            }
        };

        let progress = if tag.is_manual() {
            Arc::clone(&self.manual_running)
        } else {
            Arc::clone(&self.scheduled_running)
        };

        info!(endpoint = %endpoint.id, run = tag.as_i64(), "Transfer run started");

        for direction in endpoint.direction.scheduled() {
            if !progress.load(Ordering::Acquire) {
                break;
            }

            let transport = match self.factory.create(&endpoint) {
                Ok(t) => t,
                Err(e) => {
                    notifier.transfer_error(format!("{}: {e}", endpoint.label()));
                    break;
                }
            };
            let mut session = TransferSession::new(
                endpoint.clone(),
                transport,
                qualifier.clone(),
                self.ctx.clone(),
            )
            .with_progress_flag(Arc::clone(&progress))
            .with_counter(Arc::clone(&self.counter));

            let outcome = if direction == Direction::GET {
                session.download().await
            } else {
                session.upload().await
            };

            match outcome {
                Ok(None) => {
                    notifier.transfer_error(format!(
                        "{} run for {} aborted",
                        direction,
                        endpoint.label()
                    ));
                    break;
                }
                Err(e) => {
                    notifier.transfer_error(format!(
                        "{} run for {} failed: {e}",
                        direction,
                        endpoint.label()
                    ));
                    break;
                }
                Ok(Some(files)) => {
                    self.log_result(SyncResult::new(tag, endpoint.id, direction, run_time, files))
                        .await;
                }
            }
        }
    }

    async fn log_result(&self, result: SyncResult) {
        let notifier = &self.ctx.notifier;
        if result.is_empty() {
            if let Err(e) = self.repo.log_activation(&result).await {
                notifier.error(format!("Cannot record transfer run: {e:#}"));
            }
            return;
        }

        match self.repo.log_sync(&result).await {
            Ok(()) => notifier.info(format!(
                "{} file(s) transferred ({}) for endpoint {}: {}",
                result.files.len(),
                result.direction,
                result.endpoint_id,
                summarize(&result.files)
            )),
            Err(e) => notifier.error(format!("Cannot record transferred files: {e:#}")),
        }
    }
}

/// "10 minutes", "45 seconds"
fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        format!("{} second{}", secs, if secs == 1 { "" } else { "s" })
    }
}

fn summarize(files: &[TransferredFile]) -> String {
    const SHOWN: usize = 3;
    let mut names: Vec<&str> = files.iter().take(SHOWN).map(|f| f.name.as_str()).collect();
    if files.len() > SHOWN {
        names.push("...");
    }
    names.join(", ")
}
