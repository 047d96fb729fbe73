//! Hotfolder watcher
//!
//! Uploads files as they appear in an endpoint's local directory.
//!
//! ## Architecture
//!
//! ```text
//! inotify / FSEvents
//!       │  (notify thread)
//!       ▼
//!  stage(path) ──→ staged map ──→ pump cycle (every hotfolder_interval)
//!                      ▲               │ probe: exclusive write open
//!                      └── still busy ─┤
//!                                      ▼ ready batch
//!                              upload task (TaskTracker)
//! ```
//!
//! ## Design Notes
//!
//! - The staged map is keyed by the hash of the path; a later event for the
//!   same path replaces the earlier one.
//! - A file is ready once it can be opened for writing and, on Unix, an
//!   exclusive advisory lock can be taken without blocking.
//! - Every batch is recorded with `log_sync`, even when nothing was
//!   uploaded.
//! - Uploads count towards the counter passed to
//!   [`with_counter`](HotfolderWatcher::with_counter), normally the
//!   dispatcher's transferred-file total.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::hash::{Hash, Hasher};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use filebridge_core::domain::{Direction, Endpoint, RunTag, SyncResult, TransferredFile};
use filebridge_core::ports::{ITransferRepository, ITransportFactory};

use crate::context::SyncContext;
use crate::qualifier::{DuplicateLookup, FileQualifier, RepositoryLookup};
use crate::session::TransferSession;
use crate::SyncError;

// ============================================================================
// WriteProbe
// ============================================================================

/// Tells whether another process still holds a file open for writing
pub trait WriteProbe: Send + Sync {
    /// `Ok(())` when the file can be taken exclusively
    fn probe(&self, path: &Path) -> io::Result<()>;
}

/// Opens the file for writing and takes a non-blocking exclusive lock
#[derive(Debug, Default, Clone, Copy)]
pub struct ExclusiveOpenProbe;

impl WriteProbe for ExclusiveOpenProbe {
    fn probe(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            // SAFETY: `fd` belongs to `file`, which outlives both calls.
            let locked = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if locked != 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: same descriptor, lock taken above.
            unsafe { libc::flock(fd, libc::LOCK_UN) };
        }

        drop(file);
        Ok(())
    }
}

// ============================================================================
// HotfolderWatcher
// ============================================================================

/// Watches one endpoint's local directory and uploads settled files
pub struct HotfolderWatcher {
    inner: Arc<Inner>,
    probe: Arc<dyn WriteProbe>,
    watcher: Option<RecommendedWatcher>,
    cancel: Option<CancellationToken>,
}

struct Inner {
    endpoint: Endpoint,
    repo: Arc<dyn ITransferRepository>,
    factory: Arc<dyn ITransportFactory>,
    ctx: SyncContext,
    lookup: RepositoryLookup,
    staged: Arc<Mutex<HashMap<u64, PathBuf>>>,
    counter: Arc<AtomicU64>,
    tracker: TaskTracker,
}

impl HotfolderWatcher {
    /// Creates a watcher for `endpoint`; nothing is watched yet
    pub fn new(
        endpoint: Endpoint,
        repo: Arc<dyn ITransferRepository>,
        factory: Arc<dyn ITransportFactory>,
        ctx: SyncContext,
    ) -> Self {
        let lookup = RepositoryLookup::new(Arc::clone(&repo), ctx.instance_id, ctx.notifier.clone());
        Self {
            inner: Arc::new(Inner {
                endpoint,
                repo,
                factory,
                ctx,
                lookup,
                staged: Arc::new(Mutex::new(HashMap::new())),
                counter: Arc::new(AtomicU64::new(0)),
                tracker: TaskTracker::new(),
            }),
            probe: Arc::new(ExclusiveOpenProbe),
            watcher: None,
            cancel: None,
        }
    }

    /// Replaces the readiness probe
    pub fn with_probe(mut self, probe: Arc<dyn WriteProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Shares a counter incremented once per uploaded file
    ///
    /// Must be called before [`start_watching`](Self::start_watching).
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.counter = counter;
        } else {
            warn!(
                endpoint = %self.inner.endpoint.id,
                "Hotfolder already running, counter not shared"
            );
        }
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// Subscribes to the local directory and starts the pump task
    ///
    /// # Errors
    ///
    /// - [`SyncError::Configuration`] if the endpoint is not a hotfolder
    /// - [`SyncError::LocalDirMissing`] if the local directory is absent
    /// - [`SyncError::Watch`] if the OS watcher cannot be set up
    pub fn start_watching(&mut self) -> Result<(), SyncError> {
        let endpoint = &self.inner.endpoint;
        if !endpoint.direction.contains(Direction::HOTFOLDER_PUT) {
            return Err(SyncError::Configuration(format!(
                "endpoint {} is not flagged for hotfolder uploads",
                endpoint.id
            )));
        }
        let dir = endpoint.local_dir().clone();
        if !dir.is_dir() {
            return Err(SyncError::LocalDirMissing(dir));
        }
        if self.watcher.is_some() {
            warn!(endpoint = %endpoint.id, "Hotfolder already watched");
            return Ok(());
        }

        let staged = Arc::clone(&self.inner.staged);
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    for path in staged_paths(&event) {
                        stage_into(&staged, path);
                    }
                }
                Err(err) => warn!(error = %err, "Hotfolder watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let token = CancellationToken::new();
        let period = self.inner.ctx.settings.hotfolder_period();
        let inner = Arc::clone(&self.inner);
        let probe = Arc::clone(&self.probe);
        let cancelled = token.clone();
        self.inner.tracker.spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.pump_cycle(probe.as_ref());
                    }
                }
            }
            debug!(endpoint = %inner.endpoint.id, "Hotfolder pump stopped");
        });

        info!(
            endpoint = %endpoint.id,
            dir = %dir.display(),
            interval_secs = period.as_secs(),
            "Watching hotfolder"
        );
        self.watcher = Some(watcher);
        self.cancel = Some(token);
        Ok(())
    }

    /// Drops the subscription and cancels the pump
    ///
    /// Upload tasks already handed off keep running.
    pub fn stop_watching(&mut self) {
        self.watcher = None;
        if let Some(token) = self.cancel.take() {
            token.cancel();
            info!(endpoint = %self.inner.endpoint.id, "Stopped watching hotfolder");
        }
    }

    /// Stops watching and waits for in-flight uploads
    pub async fn shutdown(&mut self) {
        self.stop_watching();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Stages `path` as if a change event had been received
    pub fn stage(&self, path: impl Into<PathBuf>) {
        stage_into(&self.inner.staged, path.into());
    }

    /// Number of files waiting for their writer to finish
    pub fn staged_count(&self) -> usize {
        self.inner
            .staged
            .lock()
            .map(|staged| staged.len())
            .unwrap_or(0)
    }

    /// Runs one pump cycle; returns the number of files handed to upload
    pub fn pump_cycle(&self) -> usize {
        self.inner.pump_cycle(self.probe.as_ref())
    }
}

impl Drop for HotfolderWatcher {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

// ============================================================================
// Pump and upload
// ============================================================================

impl Inner {
    fn pump_cycle(self: &Arc<Self>, probe: &dyn WriteProbe) -> usize {
        let pending: Vec<(u64, PathBuf)> = match self.staged.lock() {
            Ok(mut staged) => staged.drain().collect(),
            Err(_) => return 0,
        };
        if pending.is_empty() {
            return 0;
        }

        let notifier = &self.ctx.notifier;
        let mut ready = Vec::new();
        let mut busy = Vec::new();
        for (key, path) in pending {
            match probe.probe(&path) {
                Ok(()) => ready.push(path),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock
                    ) =>
                {
                    notifier.info(format!("{} is still being written", path.display()));
                    busy.push((key, path));
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    notifier.warning(format!("{} disappeared before upload", path.display()));
                }
                Err(e) => {
                    notifier.warning(format!("Cannot probe {}: {e}", path.display()));
                    busy.push((key, path));
                }
            }
        }

        if !busy.is_empty() {
            if let Ok(mut staged) = self.staged.lock() {
                for (key, path) in busy {
                    // a newer event for the same path takes precedence
                    staged.entry(key).or_insert(path);
                }
            }
        }

        if ready.is_empty() {
            return 0;
        }
        ready.sort();
        let count = ready.len();
        debug!(endpoint = %self.endpoint.id, count, "Hotfolder batch ready");

        let inner = Arc::clone(self);
        self.tracker.spawn(async move { inner.upload_batch(ready).await });
        count
    }

    async fn upload_batch(self: Arc<Self>, batch: Vec<PathBuf>) {
        let files = self.upload_files(&batch).await;
        let result = SyncResult::new(
            RunTag::Hotfolder(self.endpoint.id),
            self.endpoint.id,
            Direction::HOTFOLDER_PUT,
            Utc::now(),
            files,
        );
        if let Err(e) = self.repo.log_sync(&result).await {
            self.ctx
                .notifier
                .error(format!("Cannot record hotfolder uploads: {e:#}"));
        }
    }

    async fn upload_files(&self, batch: &[PathBuf]) -> Vec<TransferredFile> {
        let notifier = &self.ctx.notifier;
        let lookup: Arc<dyn DuplicateLookup> = Arc::new(self.lookup.clone());
        let qualifier = match FileQualifier::new(
            self.ctx.settings.policy,
            self.endpoint.last_sync,
            Some(lookup),
        ) {
            Ok(q) => q,
            Err(e) => {
                notifier.error(e.to_string());
                return Vec::new();
            }
        };
        let transport = match self.factory.create(&self.endpoint) {
            Ok(t) => t,
            Err(e) => {
                notifier.transfer_error(format!("{}: {e}", self.endpoint.label()));
                return Vec::new();
            }
        };

        let mut session =
            TransferSession::new(self.endpoint.clone(), transport, qualifier, self.ctx.clone())
                .with_counter(Arc::clone(&self.counter));
        let mut files = Vec::new();
        for path in batch {
            match session.upload_one(path).await {
                Ok(Some(file)) => files.push(file),
                Ok(None) => {}
                Err(e) => {
                    notifier.transfer_error(format!(
                        "Hotfolder upload of {} to {} failed: {e}",
                        path.display(),
                        self.endpoint.label()
                    ));
                    break;
                }
            }
        }
        session.close().await;
        files
    }
}

/// Paths an event makes eligible for staging
fn staged_paths(event: &notify::Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        EventKind::Modify(_) => event.paths.clone(),
        _ => Vec::new(),
    }
}

fn stage_into(staged: &Mutex<HashMap<u64, PathBuf>>, path: PathBuf) {
    if path.is_dir() {
        return;
    }
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    let key = hasher.finish();
    debug!(path = %path.display(), "Staging hotfolder file");
    if let Ok(mut staged) = staged.lock() {
        staged.insert(key, path);
    }
}
