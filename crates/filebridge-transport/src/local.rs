//! Local-copy transport
//!
//! Treats the endpoint's remote directory as another path on the local
//! filesystem. Used for network shares mounted into the host and for
//! testing endpoint configurations without a server.
//!
//! ## Design Decisions
//!
//! - **Connect** is an existence check on the source directory.
//! - **Fetch** copies into a temporary sibling and renames it into place,
//!   so a reader of the local directory never sees a partial file.
//! - **Store** is not supported; uploads for this protocol are refused by
//!   the transfer session before they reach the transport.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use filebridge_core::domain::{Endpoint, FileEntry, Protocol, TransferError};
use filebridge_core::ports::ITransport;

use crate::{discard_partial, partial_path};

/// Directory-to-directory implementation of [`ITransport`]
#[derive(Debug, Clone)]
pub struct LocalCopyTransport {
    source_dir: PathBuf,
    local_dir: PathBuf,
    connected: bool,
}

impl LocalCopyTransport {
    /// Builds a transport reading from `endpoint.remote_dir`
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            source_dir: PathBuf::from(endpoint.remote_dir.as_str()),
            local_dir: endpoint.local_dir().clone(),
            connected: false,
        }
    }

    fn ensure_connected(&self) -> Result<(), TransferError> {
        if self.connected {
            Ok(())
        } else {
            Err(TransferError::NotConnected)
        }
    }
}

#[async_trait::async_trait]
impl ITransport for LocalCopyTransport {
    #[instrument(skip(self))]
    async fn connect(&mut self) -> Result<(), TransferError> {
        match tokio::fs::metadata(&self.source_dir).await {
            Ok(meta) if meta.is_dir() => {
                self.connected = true;
                debug!(source = %self.source_dir.display(), "Source directory available");
                Ok(())
            }
            _ => Err(TransferError::DirectoryNotFound(
                self.source_dir.display().to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn list_files(&mut self) -> Result<Vec<FileEntry>, TransferError> {
        self.ensure_connected()?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.source_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default();
            entries.push(FileEntry::new(name, meta.len(), modified));
        }
        // read_dir order is unspecified; keep runs reproducible
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn fetch_one(&mut self, name: &str) -> Result<u64, TransferError> {
        self.ensure_connected()?;
        let source = self.source_dir.join(name);
        let target = self.local_dir.join(name);
        let tmp_path = partial_path(&target);

        let copied = match tokio::fs::copy(&source, &tmp_path).await {
            Ok(bytes) => tokio::fs::rename(&tmp_path, &target).await.map(|()| bytes),
            Err(e) => Err(e),
        };
        copied.map_err(|e| {
            discard_partial(&tmp_path);
            TransferError::file(name, e)
        })
    }

    async fn store_one(&mut self, local_file: &Path) -> Result<u64, TransferError> {
        Err(TransferError::Unsupported(format!(
            "local copy cannot upload {}",
            local_file.display()
        )))
    }

    async fn remote_size(&mut self, name: &str) -> Result<Option<u64>, TransferError> {
        self.ensure_connected()?;
        match tokio::fs::metadata(self.source_dir.join(name)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn disconnect(&mut self) {
        self.connected = false;
    }

    fn protocol(&self) -> Protocol {
        Protocol::LocalCopy
    }
}
