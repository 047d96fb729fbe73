//! FileBridge Sync - Transfer orchestration
//!
//! Provides:
//! - File qualification (which files are eligible for transfer)
//! - Transfer sessions binding one endpoint to one transport
//! - The schedule-driven dispatcher
//! - Hotfolder watchers uploading files as they appear
//!
//! ## Modules
//!
//! - [`context`] - Explicit context shared by every component
//! - [`qualifier`] - Sync policies and the duplicate lookup
//! - [`session`] - Download/upload runs against one endpoint
//! - [`dispatcher`] - Scheduling loop and manual runs
//! - [`hotfolder`] - Filesystem-driven uploads

pub mod context;
pub mod dispatcher;
pub mod hotfolder;
pub mod qualifier;
pub mod session;

use std::path::PathBuf;

use thiserror::Error;

pub use context::SyncContext;
pub use dispatcher::{Dispatcher, DispatcherState};
pub use hotfolder::{ExclusiveOpenProbe, HotfolderWatcher, WriteProbe};
pub use qualifier::{DuplicateLookup, FileQualifier, RepositoryLookup};
pub use session::TransferSession;

/// Errors raised while setting up transfer components
///
/// Failures during a run are reported as status events instead; see the
/// dispatcher and hotfolder modules.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The component cannot work with the given settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The endpoint's local directory does not exist
    #[error("Local directory not found: {}", .0.display())]
    LocalDirMissing(PathBuf),

    /// The filesystem watcher could not be set up
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A transport failure
    #[error("Transfer error: {0}")]
    Transfer(#[from] filebridge_core::domain::TransferError),

    /// A domain-level error propagated from filebridge-core
    #[error("Domain error: {0}")]
    Domain(#[from] filebridge_core::domain::DomainError),

    /// An I/O error occurred during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
