//! FileBridge Transport - Protocol adapters
//!
//! Implements the [`ITransport`](filebridge_core::ports::ITransport) port for:
//! - Plain FTP and explicit FTPS (AUTH TLS), passive mode
//! - SFTP with password or private-key authentication
//! - Local directory copy
//!
//! ## Modules
//!
//! - [`ftp`] - FTP and FTPS sessions on top of `suppaftp`
//! - [`sftp`] - SSH file transfer on top of `ssh2`
//! - [`local`] - Directory-to-directory copy with `tokio::fs`
//! - [`secret`] - Scrambled private-key storage
//! - [`factory`] - Protocol to transport mapping
//!
//! ## Design Notes
//!
//! The FTP and SSH libraries are blocking. Every call runs on
//! `spawn_blocking` against a session kept behind a `std::sync::Mutex`, so
//! the async executor never stalls on network I/O.
//!
//! Downloads stream into `<name>.part` and are renamed into place once
//! complete; a failed download leaves nothing behind in the local directory.

pub mod factory;
pub mod ftp;
pub mod local;
pub mod secret;
pub mod sftp;

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::warn;

use filebridge_core::domain::TransferError;

pub use factory::ProtocolTransportFactory;
pub use ftp::FtpTransport;
pub use local::LocalCopyTransport;
pub use secret::{SecretScrambler, XorDeflateScrambler};
pub use sftp::SftpTransport;

/// Slot holding an open blocking session
pub(crate) type SessionSlot<C> = Arc<Mutex<Option<C>>>;

/// Runs `op` against the open session on the blocking pool
pub(crate) async fn with_session<C, T, F>(slot: &SessionSlot<C>, op: F) -> Result<T, TransferError>
where
    C: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&mut C) -> Result<T, TransferError> + Send + 'static,
{
    let slot = Arc::clone(slot);
    tokio::task::spawn_blocking(move || {
        let mut guard = slot
            .lock()
            .map_err(|_| TransferError::Remote("session lock poisoned".to_string()))?;
        let session = guard.as_mut().ok_or(TransferError::NotConnected)?;
        op(session)
    })
    .await
    .map_err(|e| TransferError::Remote(format!("transfer task failed: {e}")))?
}

/// Takes the session out of its slot, if any
pub(crate) fn take_session<C>(slot: &SessionSlot<C>) -> Option<C> {
    slot.lock().ok().and_then(|mut guard| guard.take())
}

/// Stores a freshly opened session
pub(crate) fn put_session<C>(slot: &SessionSlot<C>, session: C) -> Result<(), TransferError> {
    let mut guard = slot
        .lock()
        .map_err(|_| TransferError::Remote("session lock poisoned".to_string()))?;
    *guard = Some(session);
    Ok(())
}

/// Name a download is written under until it is complete
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let mut p = target.as_os_str().to_owned();
    p.push(".part");
    PathBuf::from(p)
}

/// Removes a partial download; a file that is already gone is fine
pub(crate) fn discard_partial(part: &Path) {
    if let Err(e) = std::fs::remove_file(part) {
        if e.kind() != ErrorKind::NotFound {
            warn!(file = %part.display(), error = %e, "Cannot remove partial download");
        }
    }
}

/// Writes `target` through its partial sibling (blocking)
///
/// `write` fills the partial file and returns the byte count. On success the
/// partial file is renamed to `target`; on any failure it is removed.
pub(crate) fn write_atomically<F>(target: &Path, name: &str, write: F) -> Result<u64, TransferError>
where
    F: FnOnce(&mut File) -> Result<u64, TransferError>,
{
    let part = partial_path(target);
    let result = File::create(&part)
        .map_err(|e| TransferError::file(name, e))
        .and_then(|mut file| write(&mut file))
        .and_then(|bytes| {
            std::fs::rename(&part, target)
                .map(|()| bytes)
                .map_err(|e| TransferError::file(name, e))
        });
    if result.is_err() {
        discard_partial(&part);
    }
    result
}

/// Final path component as UTF-8
pub(crate) fn file_name_of(path: &Path) -> Result<String, TransferError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            TransferError::file(path.display().to_string(), "path has no usable file name")
        })
}
