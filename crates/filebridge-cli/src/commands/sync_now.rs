//! Sync-now command - Run a manual transfer for one endpoint
//!
//! Provides the `filebridge sync-now <endpoint>` CLI command which:
//! 1. Resolves the endpoint among this instance's endpoints
//! 2. Runs every scheduled direction of it through a [`Dispatcher`]
//! 3. Replays the status events of the run and the transferred files
//!
//! The run is recorded in the transfer history like any manual run.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use filebridge_core::ports::{ITransportFactory, SyncEvent};
use filebridge_sync::Dispatcher;
use filebridge_transport::ProtocolTransportFactory;
use tracing::info;

use super::{drain_events, has_failures, show_status_events, Workspace};
use crate::output::{count, get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncNowCommand {
    /// Endpoint id
    pub endpoint: i64,
}

impl SyncNowCommand {
    pub async fn execute(&self, workspace: &Workspace, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let Some(endpoint) = workspace.endpoint(self.endpoint).await? else {
            formatter.error(&format!("Endpoint {} not found", self.endpoint));
            return Ok(());
        };
        if endpoint.direction.scheduled().is_empty() {
            formatter.warn(&format!(
                "Endpoint {} has no Get or Put direction, nothing to run",
                endpoint.id
            ));
            return Ok(());
        }

        info!(endpoint = %endpoint.id, label = %endpoint.label(), "Starting manual transfer");
        formatter.info(&format!("Transferring {} ...", endpoint.label()));

        let (ctx, mut events) = workspace.context();
        let factory: Arc<dyn ITransportFactory> = Arc::new(ProtocolTransportFactory::default());
        let dispatcher = Dispatcher::new(
            workspace.repository(),
            factory,
            ctx,
            workspace.config.dispatcher.clone(),
        );
        dispatcher.run_now(endpoint).await;

        let events = drain_events(&mut events);
        let files = transferred_names(&events);
        let failed = has_failures(&events);

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "endpoint_id": self.endpoint,
                "success": !failed,
                "files_transferred": dispatcher.files_transferred(),
                "files": files,
                "events": events,
            }));
            return Ok(());
        }

        show_status_events(&events, formatter.as_ref());
        for name in &files {
            formatter.info(&format!("  - {name}"));
        }
        let summary = count(files.len(), "file");
        if failed {
            formatter.error(&format!("Transfer finished with errors, {summary} transferred"));
        } else {
            formatter.success(&format!("Transfer completed, {summary} transferred"));
        }
        Ok(())
    }
}

/// Names of the files reported as transferred, in event order
fn transferred_names(events: &[SyncEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::FileTransferred { file, .. } => Some(file.name.clone()),
            SyncEvent::Status { .. } => None,
        })
        .collect()
}
