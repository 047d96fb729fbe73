//! Check command - Test connectivity to one endpoint
//!
//! Connects with the endpoint's protocol and credentials, then disconnects
//! without listing or transferring anything.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use filebridge_core::config::SyncPolicy;
use filebridge_core::domain::Endpoint;
use filebridge_core::ports::ITransportFactory;
use filebridge_sync::{FileQualifier, SyncContext, TransferSession};
use filebridge_transport::ProtocolTransportFactory;

use super::Workspace;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct CheckCommand {
    /// Endpoint id
    pub endpoint: i64,
}

impl CheckCommand {
    pub async fn execute(&self, workspace: &Workspace, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let Some(endpoint) = workspace.endpoint(self.endpoint).await? else {
            formatter.error(&format!("Endpoint {} not found", self.endpoint));
            return Ok(());
        };

        let (ctx, _events) = workspace.context();
        let factory: Arc<dyn ITransportFactory> = Arc::new(ProtocolTransportFactory::default());
        let (ok, message) = check_endpoint(endpoint, factory.as_ref(), ctx).await;

        if format.is_json() {
            formatter.print_json(&serde_json::json!({
                "endpoint_id": self.endpoint,
                "success": ok,
                "message": message,
            }));
        } else if ok {
            formatter.success(&message);
        } else {
            formatter.error(&message);
        }
        Ok(())
    }
}

/// Runs a connection check; configuration problems count as failures
pub async fn check_endpoint(
    endpoint: Endpoint,
    factory: &dyn ITransportFactory,
    ctx: SyncContext,
) -> (bool, String) {
    let transport = match factory.create(&endpoint) {
        Ok(transport) => transport,
        Err(e) => return (false, format!("Cannot set up {}: {e}", endpoint.label())),
    };
    // nothing is qualified during a check
    let qualifier = match FileQualifier::new(SyncPolicy::AllFiles, None, None) {
        Ok(qualifier) => qualifier,
        Err(e) => return (false, e.to_string()),
    };
    let mut session = TransferSession::new(endpoint, transport, qualifier, ctx);
    session.check_connection().await
}
