//! CLI subcommands
//!
//! Every command except `completions` works on a [`Workspace`]: the loaded
//! configuration plus the store, with this machine registered as a worker
//! instance.

pub mod check;
pub mod completions;
pub mod endpoints;
pub mod schedules;
pub mod sync_now;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc::UnboundedReceiver;

use filebridge_core::config::Config;
use filebridge_core::domain::{Endpoint, EndpointId, InstanceId};
use filebridge_core::ports::{
    ChannelSink, ITransferRepository, Notifier, StatusKind, SyncEvent,
};
use filebridge_store::{DatabasePool, SqliteTransferRepository};
use filebridge_sync::SyncContext;

use crate::output::OutputFormatter;

/// Configuration, store and instance shared by the subcommands
pub struct Workspace {
    pub config: Config,
    pub repo: Arc<SqliteTransferRepository>,
    pub instance_id: InstanceId,
    _db_pool: DatabasePool,
}

impl Workspace {
    /// Loads `config_path` (or the default location) and opens the store
    ///
    /// A missing file at the default location means defaults; an explicit
    /// path must exist.
    pub async fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => Config::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::load_or_default(&Config::default_path()),
        };

        let errors = config.validate();
        if !errors.is_empty() {
            let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
            anyhow::bail!("Invalid configuration: {}", details.join("; "));
        }

        let db_pool = DatabasePool::new(&config.database.path)
            .await
            .context("Failed to open database")?;
        let repo = Arc::new(SqliteTransferRepository::new(db_pool.pool().clone()));
        let instance_id = repo
            .init_instance(&config.instance_name())
            .await
            .context("Failed to register worker instance")?;

        Ok(Self {
            config,
            repo,
            instance_id,
            _db_pool: db_pool,
        })
    }

    /// Endpoints of this instance, ordered by id
    pub async fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut endpoints = self
            .repo
            .get_endpoints(self.instance_id)
            .await
            .context("Failed to query endpoints")?;
        endpoints.sort_by_key(|e| e.id);
        Ok(endpoints)
    }

    /// The endpoint with `id`, if it belongs to this instance
    pub async fn endpoint(&self, id: i64) -> Result<Option<Endpoint>> {
        let id = EndpointId::new(id);
        Ok(self.endpoints().await?.into_iter().find(|e| e.id == id))
    }

    pub fn repository(&self) -> Arc<dyn ITransferRepository> {
        self.repo.clone()
    }

    /// Sync context whose events are collected for display
    pub fn context(&self) -> (SyncContext, UnboundedReceiver<SyncEvent>) {
        let (sink, events) = ChannelSink::new();
        let ctx = SyncContext::new(
            self.instance_id,
            self.config.sync.clone(),
            Notifier::new(Arc::new(sink)),
        );
        (ctx, events)
    }
}

/// Everything published so far
pub fn drain_events(events: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

/// Replays status events through the formatter; file events are skipped
pub fn show_status_events(events: &[SyncEvent], formatter: &dyn OutputFormatter) {
    for event in events {
        if let SyncEvent::Status { kind, message } = event {
            match kind {
                StatusKind::Error | StatusKind::TransferError => formatter.error(message),
                StatusKind::Warning => formatter.warn(message),
                _ => formatter.info(message),
            }
        }
    }
}

/// True if any event reports a failure
pub fn has_failures(events: &[SyncEvent]) -> bool {
    events.iter().any(|e| {
        matches!(
            e.kind(),
            Some(StatusKind::Error) | Some(StatusKind::TransferError)
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_failures() {
        let quiet = vec![
            SyncEvent::status(StatusKind::InfoMessage, "connected"),
            SyncEvent::status(StatusKind::Warning, "slow"),
        ];
        assert!(!has_failures(&quiet));

        let failed = vec![SyncEvent::status(StatusKind::TransferError, "reset")];
        assert!(has_failures(&failed));
    }

    #[test]
    fn test_drain_events_collects_pending() {
        let (sink, mut events) = ChannelSink::new();
        let notifier = Notifier::new(Arc::new(sink));
        notifier.info("one");
        notifier.warning("two");

        let drained = drain_events(&mut events);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].kind(), Some(StatusKind::Warning));
    }

    #[tokio::test]
    async fn test_workspace_registers_instance_and_finds_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        let db_path = dir.path().join("filebridge.db");
        std::fs::write(
            &config_path,
            format!(
                "instance:\n  hostname: worker-test\ndatabase:\n  path: {}\n",
                db_path.display()
            ),
        )
        .unwrap();

        let workspace = Workspace::open(Some(&config_path)).await.unwrap();
        assert!(workspace.endpoints().await.unwrap().is_empty());
        assert!(workspace.endpoint(1).await.unwrap().is_none());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_workspace_rejects_missing_explicit_config() {
        let dir = tempfile::tempdir().unwrap();
        let result = Workspace::open(Some(&dir.path().join("absent.yaml"))).await;
        assert!(result.is_err());
    }
}
