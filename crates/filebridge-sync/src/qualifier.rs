//! File qualification
//!
//! A [`FileQualifier`] decides whether a discovered file should be
//! transferred. Each [`SyncPolicy`] applies exactly one rule; zero-length
//! files are never eligible, whatever the policy.
//!
//! | Policy | Eligible when |
//! |--------|---------------|
//! | `NewerThanRefreshDate` | modified at or after the endpoint's last sync (or never synced) |
//! | `UniqueBySizeOnDisk` | no same-name file of the same size on the receiving side |
//! | `UniqueBySizeInDatabase` | the transfer history has no matching record |
//! | `UniqueByChecksum` | always (reserved) |
//! | `AllFiles` | always |

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use filebridge_core::config::SyncPolicy;
use filebridge_core::domain::{FileEntry, FileProbe, InstanceId};
use filebridge_core::ports::{ITransferRepository, Notifier};

use crate::SyncError;

// ============================================================================
// DuplicateLookup
// ============================================================================

/// Answers "was this file transferred before?"
///
/// Lookup failures are the implementor's concern: they are reported and
/// answered with `false`, so a broken history never blocks transfers.
#[async_trait::async_trait]
pub trait DuplicateLookup: Send + Sync {
    /// True if a transfer of `entry` was recorded before
    async fn already_transferred(&self, entry: &FileEntry) -> bool;
}

/// [`DuplicateLookup`] backed by the transfer repository
#[derive(Clone)]
pub struct RepositoryLookup {
    repo: Arc<dyn ITransferRepository>,
    instance_id: InstanceId,
    notifier: Notifier,
}

impl RepositoryLookup {
    pub fn new(
        repo: Arc<dyn ITransferRepository>,
        instance_id: InstanceId,
        notifier: Notifier,
    ) -> Self {
        Self {
            repo,
            instance_id,
            notifier,
        }
    }

    /// Repository duplicate check; errors are reported and yield `false`
    pub async fn check(&self, name: &str, size: u64, modified: DateTime<Utc>) -> bool {
        let probe = FileProbe {
            instance_id: self.instance_id,
            name: name.to_string(),
            size,
            modified,
        };
        match self.repo.verify_file(&probe).await {
            Ok(found) => found,
            Err(e) => {
                self.notifier
                    .error(format!("Cannot check transfer history for {name}: {e:#}"));
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl DuplicateLookup for RepositoryLookup {
    async fn already_transferred(&self, entry: &FileEntry) -> bool {
        self.check(&entry.name, entry.size, entry.modified).await
    }
}

impl fmt::Debug for RepositoryLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryLookup")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// FileQualifier
// ============================================================================

/// Applies a [`SyncPolicy`] to candidate files
#[derive(Clone)]
pub struct FileQualifier {
    policy: SyncPolicy,
    reference_time: Option<DateTime<Utc>>,
    lookup: Option<Arc<dyn DuplicateLookup>>,
}

impl FileQualifier {
    /// Creates a qualifier
    ///
    /// `reference_time` is the endpoint's last sync. The database policy
    /// cannot work without `lookup`; asking for it anyway is a configuration
    /// error.
    pub fn new(
        policy: SyncPolicy,
        reference_time: Option<DateTime<Utc>>,
        lookup: Option<Arc<dyn DuplicateLookup>>,
    ) -> Result<Self, SyncError> {
        if policy.requires_lookup() && lookup.is_none() {
            return Err(SyncError::Configuration(format!(
                "policy {policy} needs access to the transfer history"
            )));
        }
        Ok(Self {
            policy,
            reference_time,
            lookup,
        })
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// True if [`qualify`](Self::qualify) needs the receiving side's size
    pub fn needs_opposite_size(&self) -> bool {
        matches!(self.policy, SyncPolicy::UniqueBySizeOnDisk)
    }

    /// Decides whether `candidate` is eligible
    ///
    /// `opposite_size` is the size of the same-name file on the receiving
    /// side, `None` if there is none. Only `UniqueBySizeOnDisk` reads it.
    pub async fn qualify(&self, candidate: &FileEntry, opposite_size: Option<u64>) -> bool {
        if candidate.size == 0 {
            debug!(file = %candidate.name, "Skipping empty file");
            return false;
        }

        let eligible = match self.policy {
            SyncPolicy::NewerThanRefreshDate => match self.reference_time {
                Some(last_sync) => candidate.modified >= last_sync,
                None => true,
            },
            SyncPolicy::UniqueBySizeOnDisk => opposite_size != Some(candidate.size),
            SyncPolicy::UniqueBySizeInDatabase => match &self.lookup {
                Some(lookup) => !lookup.already_transferred(candidate).await,
                None => true,
            },
            SyncPolicy::UniqueByChecksum | SyncPolicy::AllFiles => true,
        };

        if !eligible {
            debug!(file = %candidate.name, policy = %self.policy, "File does not qualify");
        }
        eligible
    }
}

impl fmt::Debug for FileQualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileQualifier")
            .field("policy", &self.policy)
            .field("reference_time", &self.reference_time)
            .field("has_lookup", &self.lookup.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, TimeZone};

    use super::*;

    struct FixedLookup {
        answer: bool,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DuplicateLookup for FixedLookup {
        async fn already_transferred(&self, _entry: &FileEntry) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn entry(size: u64, modified: DateTime<Utc>) -> FileEntry {
        FileEntry::new("report.csv", size, modified)
    }

    #[tokio::test]
    async fn test_all_files_accepts_non_empty_rejects_empty() {
        let q = FileQualifier::new(SyncPolicy::AllFiles, None, None).unwrap();
        assert!(q.qualify(&entry(1, at(1)), None).await);
        assert!(q.qualify(&entry(10_000, at(1)), Some(10_000)).await);
        assert!(!q.qualify(&entry(0, at(1)), None).await);
    }

    #[tokio::test]
    async fn test_newer_than_refresh_date_boundary() {
        let last_sync = at(12);
        let q = FileQualifier::new(SyncPolicy::NewerThanRefreshDate, Some(last_sync), None)
            .unwrap();
        assert!(!q.qualify(&entry(5, last_sync - Duration::seconds(1)), None).await);
        assert!(q.qualify(&entry(5, last_sync), None).await);
        assert!(q.qualify(&entry(5, last_sync + Duration::hours(1)), None).await);
    }

    #[tokio::test]
    async fn test_newer_than_without_last_sync_accepts() {
        let q = FileQualifier::new(SyncPolicy::NewerThanRefreshDate, None, None).unwrap();
        assert!(q.qualify(&entry(5, at(0)), None).await);
    }

    #[tokio::test]
    async fn test_unique_by_size_on_disk() {
        let q = FileQualifier::new(SyncPolicy::UniqueBySizeOnDisk, None, None).unwrap();
        assert!(q.needs_opposite_size());
        assert!(q.qualify(&entry(10, at(1)), None).await);
        assert!(q.qualify(&entry(10, at(1)), Some(9)).await);
        assert!(!q.qualify(&entry(10, at(1)), Some(10)).await);
    }

    #[tokio::test]
    async fn test_database_policy_requires_lookup() {
        let err = FileQualifier::new(SyncPolicy::UniqueBySizeInDatabase, None, None).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_database_policy_consults_lookup() {
        let lookup = Arc::new(FixedLookup {
            answer: true,
            calls: AtomicUsize::new(0),
        });
        let q = FileQualifier::new(
            SyncPolicy::UniqueBySizeInDatabase,
            None,
            Some(lookup.clone() as Arc<dyn DuplicateLookup>),
        )
        .unwrap();

        assert!(!q.qualify(&entry(10, at(1)), None).await);
        // empty files are rejected before the lookup
        assert!(!q.qualify(&entry(0, at(1)), None).await);
        assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_checksum_policy_behaves_as_all_files() {
        let q = FileQualifier::new(SyncPolicy::UniqueByChecksum, Some(at(23)), None).unwrap();
        assert!(!q.needs_opposite_size());
        assert!(q.qualify(&entry(3, at(1)), Some(3)).await);
        assert!(!q.qualify(&entry(0, at(1)), None).await);
    }
}
