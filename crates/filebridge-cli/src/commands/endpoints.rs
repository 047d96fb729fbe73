//! Endpoints command - List the endpoints of this worker instance

use anyhow::Result;
use clap::Args;
use filebridge_core::domain::Endpoint;

use super::Workspace;
use crate::output::{count, get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct EndpointsCommand {}

impl EndpointsCommand {
    pub async fn execute(&self, workspace: &Workspace, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);
        let endpoints = workspace.endpoints().await?;

        if format.is_json() {
            let rows: Vec<serde_json::Value> = endpoints.iter().map(endpoint_json).collect();
            formatter.print_json(&serde_json::json!({
                "instance_id": workspace.instance_id.as_i64(),
                "endpoints": rows,
            }));
            return Ok(());
        }

        if endpoints.is_empty() {
            formatter.warn("No endpoints configured for this instance");
            return Ok(());
        }

        formatter.success(&count(endpoints.len(), "endpoint"));
        for endpoint in &endpoints {
            formatter.info(&endpoint_line(endpoint));
        }
        Ok(())
    }
}

fn endpoint_json(endpoint: &Endpoint) -> serde_json::Value {
    serde_json::json!({
        "id": endpoint.id.as_i64(),
        "protocol": endpoint.protocol.to_string(),
        "host": endpoint.host,
        "port": endpoint.port,
        "remote_dir": endpoint.remote_dir.as_str(),
        "local_dir": endpoint.local_dir().display().to_string(),
        "direction": endpoint.direction.to_string(),
        "username": endpoint.credentials.username,
        "last_sync": endpoint.last_sync.map(|t| t.to_rfc3339()),
        "next_sync": endpoint.next_sync.map(|t| t.to_rfc3339()),
    })
}

fn endpoint_line(endpoint: &Endpoint) -> String {
    let last = endpoint
        .last_sync
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "[{}] {} <-> {} ({}), last sync: {}",
        endpoint.id,
        endpoint.label(),
        endpoint.local_dir().display(),
        endpoint.direction,
        last
    )
}

#[cfg(test)]
mod tests {
    use filebridge_core::domain::{Direction, EndpointId, InstanceId, Protocol};

    use super::*;

    fn sample() -> Endpoint {
        Endpoint::new(
            EndpointId::new(4),
            InstanceId::new(1),
            Protocol::Sftp,
            "sftp.example.com",
            "/outgoing",
            "/srv/in",
        )
        .with_direction(Direction::GET)
    }

    #[test]
    fn test_endpoint_line_without_history() {
        let line = endpoint_line(&sample());
        assert!(line.starts_with("[4] "));
        assert!(line.ends_with("last sync: never"));
    }

    #[test]
    fn test_endpoint_json_fields() {
        let json = endpoint_json(&sample());
        assert_eq!(json["id"], 4);
        assert_eq!(json["host"], "sftp.example.com");
        assert!(json["last_sync"].is_null());
    }
}
