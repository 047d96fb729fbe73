//! Transfer session
//!
//! A [`TransferSession`] binds one endpoint, one transport and one
//! qualifier, and runs a single direction against them.
//!
//! ## Result convention
//!
//! - `Ok(Some(files))`: the run completed (possibly transferring nothing,
//!   possibly interrupted by the progress flag).
//! - `Ok(None)`: a precondition failed; an `Error` status has been published.
//! - `Err(TransferError)`: the transport failed; the caller reports it.
//!
//! Sessions never retry. Each `download()`/`upload()` connects first and
//! disconnects before returning; `upload_one()` connects lazily and keeps
//! the connection open until [`close`](TransferSession::close).

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use filebridge_core::domain::{
    Direction, Endpoint, FileEntry, Protocol, TransferError, TransferredFile,
};
use filebridge_core::ports::{ITransport, StatusKind};

use crate::context::SyncContext;
use crate::qualifier::FileQualifier;

/// Connection checks slower than this report their duration
const SLOW_CONNECT: Duration = Duration::from_secs(2);

/// One endpoint, one transport, one qualifier
pub struct TransferSession {
    endpoint: Endpoint,
    transport: Box<dyn ITransport>,
    qualifier: FileQualifier,
    ctx: SyncContext,
    progress: Arc<AtomicBool>,
    counter: Arc<AtomicU64>,
    connected: bool,
}

impl TransferSession {
    /// Creates a session; nothing is contacted yet
    pub fn new(
        endpoint: Endpoint,
        transport: Box<dyn ITransport>,
        qualifier: FileQualifier,
        ctx: SyncContext,
    ) -> Self {
        Self {
            endpoint,
            transport,
            qualifier,
            ctx,
            progress: Arc::new(AtomicBool::new(true)),
            counter: Arc::new(AtomicU64::new(0)),
            connected: false,
        }
    }

    /// Shares a progress flag; clearing it stops the current loop early
    pub fn with_progress_flag(mut self, progress: Arc<AtomicBool>) -> Self {
        self.progress = progress;
        self
    }

    /// Shares a counter incremented once per transferred file
    pub fn with_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.counter = counter;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    // ========================================================================
    // Download
    // ========================================================================

    /// Fetches every qualifying remote file into the local directory
    #[instrument(skip(self), fields(endpoint = %self.endpoint.id))]
    pub async fn download(&mut self) -> Result<Option<Vec<TransferredFile>>, TransferError> {
        if !self.local_dir_ready().await {
            return Ok(None);
        }
        self.open().await?;
        let result = self.download_files().await;
        self.close().await;
        result.map(Some)
    }

    async fn download_files(&mut self) -> Result<Vec<TransferredFile>, TransferError> {
        let timeout = self.ctx.settings.operation_timeout();
        let listing = guarded(timeout, self.transport.list_files()).await?;
        debug!(count = listing.len(), "Remote listing received");

        let mut files = Vec::new();
        for entry in listing {
            if !self.progress.load(Ordering::Acquire) {
                self.report_interrupted(Direction::GET, files.len());
                break;
            }

            let local_path = self.local_path(&entry.name);
            let opposite_size = if self.qualifier.needs_opposite_size() {
                local_file_size(&local_path).await
            } else {
                None
            };
            if !self.qualifier.qualify(&entry, opposite_size).await {
                continue;
            }

            let written = guarded(timeout, self.transport.fetch_one(&entry.name)).await?;

            if self.ctx.settings.verify_after_transfer {
                let actual = local_file_size(&local_path).await;
                if actual != Some(entry.size) {
                    self.ctx.notifier.warning(format!(
                        "Size mismatch after downloading {}: expected {} bytes, found {:?}; local copy removed",
                        entry.name, entry.size, actual
                    ));
                    if let Err(e) = tokio::fs::remove_file(&local_path).await {
                        warn!(
                            file = %local_path.display(),
                            error = %e,
                            "Cannot remove unverified local copy"
                        );
                    }
                    continue;
                }
            }

            let file = self
                .record(&entry.name, written, entry.modified, &local_path)
                .await?;
            self.announce(Direction::GET, &file);
            files.push(file);
        }
        Ok(files)
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Stores every qualifying local file in the remote directory
    #[instrument(skip(self), fields(endpoint = %self.endpoint.id))]
    pub async fn upload(&mut self) -> Result<Option<Vec<TransferredFile>>, TransferError> {
        if self.endpoint.protocol == Protocol::LocalCopy {
            self.ctx.notifier.warning(format!(
                "Upload is not supported for local copy endpoint {}",
                self.endpoint.label()
            ));
            return Ok(Some(Vec::new()));
        }
        if !self.local_dir_ready().await {
            return Ok(None);
        }

        let candidates = list_local_files(self.endpoint.local_dir()).await?;
        self.open().await?;
        let result = self.upload_files(candidates).await;
        self.close().await;
        result.map(Some)
    }

    async fn upload_files(
        &mut self,
        candidates: Vec<(PathBuf, FileEntry)>,
    ) -> Result<Vec<TransferredFile>, TransferError> {
        let mut files = Vec::new();
        for (path, entry) in candidates {
            if !self.progress.load(Ordering::Acquire) {
                self.report_interrupted(Direction::PUT, files.len());
                break;
            }
            if let Some(file) = self.store_qualified(&path, &entry).await? {
                self.announce(Direction::PUT, &file);
                files.push(file);
            }
        }
        Ok(files)
    }

    /// Uploads a single file picked up by a hotfolder
    ///
    /// Returns `Ok(None)` when the file does not qualify or cannot be read.
    #[instrument(skip(self, file), fields(endpoint = %self.endpoint.id, file = %file.display()))]
    pub async fn upload_one(
        &mut self,
        file: &Path,
    ) -> Result<Option<TransferredFile>, TransferError> {
        if self.endpoint.protocol == Protocol::LocalCopy {
            self.ctx.notifier.warning(format!(
                "Upload is not supported for local copy endpoint {}",
                self.endpoint.label()
            ));
            return Ok(None);
        }

        let Some(entry) = file_entry(file).await else {
            self.ctx
                .notifier
                .warning(format!("{} is no longer a readable file", file.display()));
            return Ok(None);
        };

        if !self.connected {
            self.open().await?;
        }
        let uploaded = self.store_qualified(file, &entry).await?;
        if let Some(transferred) = &uploaded {
            self.announce(Direction::HOTFOLDER_PUT, transferred);
        }
        Ok(uploaded)
    }

    async fn store_qualified(
        &mut self,
        path: &Path,
        entry: &FileEntry,
    ) -> Result<Option<TransferredFile>, TransferError> {
        let timeout = self.ctx.settings.operation_timeout();
        let opposite_size = if self.qualifier.needs_opposite_size() {
            guarded(timeout, self.transport.remote_size(&entry.name)).await?
        } else {
            None
        };
        if !self.qualifier.qualify(entry, opposite_size).await {
            return Ok(None);
        }

        let written = guarded(timeout, self.transport.store_one(path)).await?;

        if self.ctx.settings.verify_after_transfer {
            let remote = guarded(timeout, self.transport.remote_size(&entry.name)).await?;
            if remote != Some(entry.size) {
                self.ctx.notifier.warning(format!(
                    "Size mismatch after uploading {}: expected {} bytes, server reports {:?}",
                    entry.name, entry.size, remote
                ));
                return Ok(None);
            }
        }

        self.record(&entry.name, written, entry.modified, path)
            .await
            .map(Some)
    }

    // ========================================================================
    // Connection check
    // ========================================================================

    /// Connects and disconnects without transferring anything
    pub async fn check_connection(&mut self) -> (bool, String) {
        let started = Instant::now();
        let timeout = self.ctx.settings.operation_timeout();
        match guarded(timeout, self.transport.connect()).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.transport.disconnect().await;
                let message = if elapsed > SLOW_CONNECT {
                    format!(
                        "Connection to {} succeeded after {:.1} s",
                        self.endpoint.label(),
                        elapsed.as_secs_f64()
                    )
                } else {
                    format!("Connection to {} succeeded", self.endpoint.label())
                };
                info!(
                    endpoint = %self.endpoint.id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Connection check passed"
                );
                (true, message)
            }
            Err(e) => (
                false,
                format!("Connection to {} failed: {e}", self.endpoint.label()),
            ),
        }
    }

    /// Disconnects if connected
    pub async fn close(&mut self) {
        if self.connected {
            self.transport.disconnect().await;
            self.connected = false;
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn open(&mut self) -> Result<(), TransferError> {
        let timeout = self.ctx.settings.operation_timeout();
        guarded(timeout, self.transport.connect()).await?;
        self.connected = true;
        Ok(())
    }

    async fn local_dir_ready(&self) -> bool {
        let dir = self.endpoint.local_dir();
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => true,
            _ => {
                self.ctx.notifier.error(format!(
                    "Local directory {} of endpoint {} does not exist",
                    dir.display(),
                    self.endpoint.label()
                ));
                false
            }
        }
    }

    fn local_path(&self, name: &str) -> PathBuf {
        self.endpoint.local_dir().join(name)
    }

    async fn record(
        &self,
        name: &str,
        size: u64,
        modified: DateTime<Utc>,
        local_copy: &Path,
    ) -> Result<TransferredFile, TransferError> {
        let checksum = sha256_file(local_copy)
            .await
            .map_err(|e| TransferError::file(name, format!("checksum failed: {e}")))?;
        Ok(TransferredFile {
            name: name.to_string(),
            size,
            modified,
            checksum,
        })
    }

    fn announce(&self, direction: Direction, file: &TransferredFile) {
        self.counter.fetch_add(1, Ordering::AcqRel);
        self.ctx.notifier.file_transferred(direction, file.clone());
    }

    fn report_interrupted(&self, direction: Direction, done: usize) {
        self.ctx.notifier.status(
            StatusKind::InfoMessage,
            format!(
                "{} transfer for {} interrupted after {} file(s)",
                direction,
                self.endpoint.label(),
                done
            ),
        );
    }
}

/// Applies the optional per-operation limit
async fn guarded<T>(
    limit: Option<Duration>,
    fut: impl Future<Output = Result<T, TransferError>>,
) -> Result<T, TransferError> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransferError::Timeout(limit))?,
        None => fut.await,
    }
}

async fn local_file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

async fn file_entry(path: &Path) -> Option<FileEntry> {
    let meta = tokio::fs::metadata(path).await.ok().filter(|m| m.is_file())?;
    let name = path.file_name()?.to_str()?.to_string();
    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Some(FileEntry::new(name, meta.len(), modified))
}

/// Regular files of `dir`, ordered by name
async fn list_local_files(dir: &Path) -> Result<Vec<(PathBuf, FileEntry)>, TransferError> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if let Some(file) = file_entry(&path).await {
            files.push((path, file));
        }
    }
    files.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    Ok(files)
}

/// SHA-256 of a file as lowercase hex
async fn sha256_file(path: &Path) -> io::Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        let digest: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Ok(digest)
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
