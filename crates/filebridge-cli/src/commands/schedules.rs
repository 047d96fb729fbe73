//! Schedules command - Show the transfer windows of one endpoint
//!
//! For each schedule prints the weekly window, the stride, the number of
//! runs per week and the next run in local time.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::Args;
use filebridge_core::domain::Schedule;
use filebridge_core::ports::ITransferRepository;

use super::Workspace;
use crate::output::{count, get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct SchedulesCommand {
    /// Endpoint id
    pub endpoint: i64,
}

impl SchedulesCommand {
    pub async fn execute(&self, workspace: &Workspace, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(format);

        let Some(endpoint) = workspace.endpoint(self.endpoint).await? else {
            formatter.error(&format!("Endpoint {} not found", self.endpoint));
            return Ok(());
        };

        let schedules = workspace
            .repo
            .get_schedules(endpoint.id)
            .await
            .context("Failed to query schedules")?;
        let now = Local::now();

        if format.is_json() {
            let rows: Vec<serde_json::Value> =
                schedules.iter().map(|s| schedule_json(s, &now)).collect();
            formatter.print_json(&serde_json::json!({
                "endpoint_id": endpoint.id.as_i64(),
                "schedules": rows,
            }));
            return Ok(());
        }

        if schedules.is_empty() {
            formatter.warn(&format!("Endpoint {} has no schedules", endpoint.id));
            return Ok(());
        }

        formatter.success(&format!(
            "{} for {}",
            count(schedules.len(), "schedule"),
            endpoint.label()
        ));
        for schedule in &schedules {
            formatter.info(&schedule_line(schedule, &now));
        }
        Ok(())
    }
}

fn next_run_text(schedule: &Schedule, now: &DateTime<Local>) -> String {
    if !schedule.enabled {
        return "disabled".to_string();
    }
    match schedule.next_run_after(now) {
        Some(next) => next.format("%a %Y-%m-%d %H:%M").to_string(),
        None => "invalid window".to_string(),
    }
}

fn schedule_line(schedule: &Schedule, now: &DateTime<Local>) -> String {
    format!(
        "[{}] {}: {} to {} every {} min, {} per week, next: {}",
        schedule.id,
        schedule.name,
        schedule.start,
        schedule.stop,
        schedule.stride_minutes,
        count(schedule.repeats() as usize, "run"),
        next_run_text(schedule, now)
    )
}

fn schedule_json(schedule: &Schedule, now: &DateTime<Local>) -> serde_json::Value {
    serde_json::json!({
        "id": schedule.id.as_i64(),
        "name": schedule.name,
        "start": schedule.start.to_string(),
        "stop": schedule.stop.to_string(),
        "stride_minutes": schedule.stride_minutes,
        "repeats": schedule.repeats(),
        "enabled": schedule.enabled,
        "next_run": schedule.next_run_after(now).map(|t| t.to_rfc3339()),
    })
}
