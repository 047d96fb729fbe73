//! Domain entities and business logic
//!
//! This module contains the core domain types for FileBridge:
//! - Newtypes for row identifiers and the normalized remote directory
//! - Endpoint configuration (protocol, direction set, credentials)
//! - Weekly schedules and next-run computation
//! - Per-run result records
//! - Domain-specific error types

pub mod endpoint;
pub mod errors;
pub mod newtypes;
pub mod schedule;
pub mod sync_result;

// Re-export commonly used types
pub use endpoint::{
    Credentials, Direction, Endpoint, Protocol, ScrambledSecret, Secret, TransferMode,
};
pub use errors::{DomainError, TransferError};
pub use newtypes::*;
pub use schedule::{next_due, Fingerprint, NextSync, Schedule, WeekPoint, MIN_STRIDE_MINUTES};
pub use sync_result::{FileEntry, FileProbe, RunTag, SyncResult, TransferredFile};
