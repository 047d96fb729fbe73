//! Per-run result records
//!
//! These values are created fresh by every transfer run and handed to the
//! repository; the core never reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::endpoint::Direction;
use super::newtypes::{EndpointId, InstanceId, ScheduleId};

/// Metadata of a file as reported by a listing (remote or local)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name without directory
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub modified: DateTime<Utc>,
}

impl FileEntry {
    /// Create an entry
    pub fn new(name: impl Into<String>, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            modified,
        }
    }
}

/// A file that was transferred successfully
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferredFile {
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time of the source file
    pub modified: DateTime<Utc>,
    /// SHA-256 of the content, lowercase hex
    pub checksum: String,
}

/// Shape used for "already transferred?" lookups
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileProbe {
    /// Worker instance performing the lookup
    pub instance_id: InstanceId,
    /// File name
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time
    pub modified: DateTime<Utc>,
}

/// What triggered a run
///
/// Stored as a signed id: positive schedule ids for scheduled runs, negated
/// endpoint ids for manual and hotfolder runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunTag {
    /// Triggered by a due schedule
    Scheduled(ScheduleId),
    /// Triggered by a "start now" request
    Manual(EndpointId),
    /// Triggered by the hotfolder watcher
    Hotfolder(EndpointId),
}

impl RunTag {
    /// Signed storage id
    pub fn as_i64(&self) -> i64 {
        match self {
            RunTag::Scheduled(id) => id.as_i64(),
            RunTag::Manual(id) | RunTag::Hotfolder(id) => -id.as_i64(),
        }
    }

    /// True for runs not triggered by a schedule
    pub fn is_manual(&self) -> bool {
        !matches!(self, RunTag::Scheduled(_))
    }
}

/// Outcome of one direction of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// What triggered the run
    pub tag: RunTag,
    /// Endpoint the run executed against
    pub endpoint_id: EndpointId,
    /// Direction executed
    pub direction: Direction,
    /// Planned or actual run time
    pub run_time: DateTime<Utc>,
    /// Files transferred, in transfer order
    pub files: Vec<TransferredFile>,
}

impl SyncResult {
    /// Create a result
    pub fn new(
        tag: RunTag,
        endpoint_id: EndpointId,
        direction: Direction,
        run_time: DateTime<Utc>,
        files: Vec<TransferredFile>,
    ) -> Self {
        Self {
            tag,
            endpoint_id,
            direction,
            run_time,
            files,
        }
    }

    /// Signed run id (see [`RunTag`])
    pub fn run_id(&self) -> i64 {
        self.tag.as_i64()
    }

    /// True when the run activated but transferred nothing
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
