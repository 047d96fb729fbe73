//! SQLite implementation of ITransferRepository
//!
//! ## Type Mapping
//!
//! | Domain Type                 | SQL Type | Strategy                                  |
//! |-----------------------------|----------|-------------------------------------------|
//! | InstanceId, EndpointId, ... | INTEGER  | row id via `.as_i64()` / `::new()`        |
//! | Protocol, TransferMode      | INTEGER  | `.code()` / `from_code()`                 |
//! | Direction                   | INTEGER  | bit set via `.bits()`                     |
//! | Secret                      | TEXT     | serde_json serialization                  |
//! | WeekPoint                   | INTEGER  | minutes since Monday 00:00                |
//! | DateTime<Utc>               | TEXT     | RFC 3339, whole seconds                   |
//!
//! Private keys are stored in their scrambled form; the store never sees
//! the clear key.

use chrono::{DateTime, Local, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use filebridge_core::domain::{
    next_due, Credentials, Direction, Endpoint, EndpointId, FileProbe, InstanceId, NextSync,
    Protocol, Schedule, ScheduleId, Secret, SyncResult, TransferMode, WeekPoint,
};
use filebridge_core::ports::{ITransferRepository, ModifyOp};

use crate::StoreError;

/// SQLite-based implementation of the transfer repository port
pub struct SqliteTransferRepository {
    pool: SqlitePool,
}

impl SqliteTransferRepository {
    /// Creates a repository over `pool`
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Schedules of every endpoint owned by `instance`
    async fn instance_schedules(&self, instance: InstanceId) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query(
            "SELECT s.* FROM schedules s \
             JOIN endpoints e ON e.id = s.endpoint_id \
             WHERE e.instance_id = ? AND s.enabled = 1 \
             ORDER BY s.id",
        )
        .bind(instance.as_i64())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(schedule_from_row).collect()
    }

    /// Inserts the run row, its files and bumps the endpoint's last sync
    async fn record_run(&self, result: &SyncResult) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let instance_id: Option<i64> =
            sqlx::query_scalar("SELECT instance_id FROM endpoints WHERE id = ?")
                .bind(result.endpoint_id.as_i64())
                .fetch_optional(&mut *tx)
                .await?;
        let instance_id = instance_id
            .ok_or_else(|| StoreError::NotFound(format!("endpoint {}", result.endpoint_id)))?;

        let run_time = format_time(&result.run_time);
        let run_id = sqlx::query(
            "INSERT INTO runs (endpoint_id, run_tag, direction, run_time, file_count, logged_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(result.endpoint_id.as_i64())
        .bind(result.run_id())
        .bind(i64::from(result.direction.bits()))
        .bind(&run_time)
        .bind(result.files.len() as i64)
        .bind(format_time(&Utc::now()))
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for file in &result.files {
            sqlx::query(
                "INSERT INTO transferred_files \
                 (run_id, instance_id, name, size, modified, checksum) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(run_id)
            .bind(instance_id)
            .bind(&file.name)
            .bind(file.size as i64)
            .bind(format_time(&file.modified))
            .bind(&file.checksum)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE endpoints SET last_sync = ? WHERE id = ?")
            .bind(&run_time)
            .bind(result.endpoint_id.as_i64())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(run_id)
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// Times are stored with whole seconds so probes built from coarse
/// listings match stored rows
fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::SerializationError(format!("Failed to parse datetime '{}': {}", s, e)))
}

fn parse_optional_time(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match s {
        Some(ref val) if !val.is_empty() => parse_time(val).map(Some),
        _ => Ok(None),
    }
}

fn domain_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::SerializationError(e.to_string())
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn endpoint_from_row(row: &SqliteRow) -> Result<Endpoint, StoreError> {
    let id: i64 = row.try_get("id")?;
    let instance_id: i64 = row.try_get("instance_id")?;
    let host: String = row.try_get("host")?;
    let port: Option<i64> = row.try_get("port")?;
    let username: String = row.try_get("username")?;
    let secret_json: String = row.try_get("secret")?;
    let protocol: i64 = row.try_get("protocol")?;
    let direction: i64 = row.try_get("direction")?;
    let transfer_mode: i64 = row.try_get("transfer_mode")?;
    let remote_dir: String = row.try_get("remote_dir")?;
    let local_dir: String = row.try_get("local_dir")?;
    let last_sync: Option<String> = row.try_get("last_sync")?;
    let next_sync: Option<String> = row.try_get("next_sync")?;

    let secret: Secret = serde_json::from_str(&secret_json)
        .map_err(|e| StoreError::SerializationError(format!("Failed to parse secret: {}", e)))?;
    let port = port
        .map(u16::try_from)
        .transpose()
        .map_err(|e| StoreError::SerializationError(format!("Invalid port: {}", e)))?;

    let mut endpoint = Endpoint::new(
        EndpointId::new(id),
        InstanceId::new(instance_id),
        Protocol::from_code(protocol).map_err(domain_err)?,
        host,
        remote_dir,
        local_dir,
    )
    .with_credentials(Credentials { username, secret })
    .with_direction(Direction::from_bits_truncate(direction as u8))
    .with_transfer_mode(TransferMode::from_code(transfer_mode).map_err(domain_err)?);
    endpoint.port = port;
    endpoint.last_sync = parse_optional_time(last_sync)?;
    endpoint.next_sync = parse_optional_time(next_sync)?;
    Ok(endpoint)
}

fn schedule_from_row(row: &SqliteRow) -> Result<Schedule, StoreError> {
    let id: i64 = row.try_get("id")?;
    let endpoint_id: i64 = row.try_get("endpoint_id")?;
    let name: String = row.try_get("name")?;
    let start_minute: i64 = row.try_get("start_minute")?;
    let stop_minute: i64 = row.try_get("stop_minute")?;
    let stride_minutes: i64 = row.try_get("stride_minutes")?;
    let enabled: bool = row.try_get("enabled")?;

    let stride_minutes = u32::try_from(stride_minutes)
        .map_err(|e| StoreError::SerializationError(format!("Invalid stride: {}", e)))?;

    let mut schedule = Schedule::new(
        ScheduleId::new(id),
        EndpointId::new(endpoint_id),
        name,
        WeekPoint::from_minute_of_week(start_minute),
        WeekPoint::from_minute_of_week(stop_minute),
        stride_minutes,
    );
    schedule.enabled = enabled;
    Ok(schedule)
}

fn secret_json(secret: &Secret) -> Result<String, StoreError> {
    serde_json::to_string(secret)
        .map_err(|e| StoreError::SerializationError(format!("Failed to serialize secret: {}", e)))
}

// ============================================================================
// ITransferRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl ITransferRepository for SqliteTransferRepository {
    // --- Instance ---

    async fn init_instance(&self, hostname: &str) -> anyhow::Result<InstanceId> {
        sqlx::query("INSERT OR IGNORE INTO instances (hostname, created_at) VALUES (?, ?)")
            .bind(hostname)
            .bind(format_time(&Utc::now()))
            .execute(&self.pool)
            .await?;

        let id: i64 = sqlx::query_scalar("SELECT id FROM instances WHERE hostname = ?")
            .bind(hostname)
            .fetch_one(&self.pool)
            .await?;

        tracing::debug!(hostname, instance_id = id, "Instance registered");
        Ok(InstanceId::new(id))
    }

    // --- Endpoints ---

    async fn get_endpoints(&self, instance: InstanceId) -> anyhow::Result<Vec<Endpoint>> {
        let rows = sqlx::query("SELECT * FROM endpoints WHERE instance_id = ? ORDER BY id")
            .bind(instance.as_i64())
            .fetch_all(&self.pool)
            .await?;

        let endpoints = rows
            .iter()
            .map(endpoint_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(endpoints)
    }

    async fn modify_endpoint(&self, endpoint: &mut Endpoint, op: ModifyOp) -> anyhow::Result<()> {
        let local_dir = endpoint.local_dir().to_string_lossy().into_owned();
        let port = endpoint.port.map(i64::from);
        let secret = secret_json(&endpoint.credentials.secret)?;
        let last_sync = endpoint.last_sync.as_ref().map(format_time);
        let next_sync = endpoint.next_sync.as_ref().map(format_time);

        match op {
            ModifyOp::Insert => {
                let id = sqlx::query(
                    "INSERT INTO endpoints \
                     (instance_id, host, port, username, secret, protocol, direction, \
                      transfer_mode, remote_dir, local_dir, last_sync, next_sync) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(endpoint.instance_id.as_i64())
                .bind(&endpoint.host)
                .bind(port)
                .bind(&endpoint.credentials.username)
                .bind(&secret)
                .bind(endpoint.protocol.code())
                .bind(i64::from(endpoint.direction.bits()))
                .bind(endpoint.transfer_mode.code())
                .bind(endpoint.remote_dir.as_str())
                .bind(&local_dir)
                .bind(&last_sync)
                .bind(&next_sync)
                .execute(&self.pool)
                .await?
                .last_insert_rowid();
                endpoint.id = EndpointId::new(id);
                tracing::trace!(endpoint_id = id, "Inserted endpoint");
            }
            ModifyOp::Update => {
                let updated = sqlx::query(
                    "UPDATE endpoints SET \
                     instance_id = ?, host = ?, port = ?, username = ?, secret = ?, \
                     protocol = ?, direction = ?, transfer_mode = ?, remote_dir = ?, \
                     local_dir = ?, last_sync = ?, next_sync = ? \
                     WHERE id = ?",
                )
                .bind(endpoint.instance_id.as_i64())
                .bind(&endpoint.host)
                .bind(port)
                .bind(&endpoint.credentials.username)
                .bind(&secret)
                .bind(endpoint.protocol.code())
                .bind(i64::from(endpoint.direction.bits()))
                .bind(endpoint.transfer_mode.code())
                .bind(endpoint.remote_dir.as_str())
                .bind(&local_dir)
                .bind(&last_sync)
                .bind(&next_sync)
                .bind(endpoint.id.as_i64())
                .execute(&self.pool)
                .await?
                .rows_affected();
                if updated == 0 {
                    return Err(StoreError::NotFound(format!("endpoint {}", endpoint.id)).into());
                }
                tracing::trace!(endpoint_id = %endpoint.id, "Updated endpoint");
            }
            ModifyOp::Delete => {
                sqlx::query("DELETE FROM endpoints WHERE id = ?")
                    .bind(endpoint.id.as_i64())
                    .execute(&self.pool)
                    .await?;
                tracing::trace!(endpoint_id = %endpoint.id, "Deleted endpoint");
            }
        }
        Ok(())
    }

    async fn select_endpoint(&self, schedule: ScheduleId) -> anyhow::Result<Option<Endpoint>> {
        let row = sqlx::query(
            "SELECT e.* FROM endpoints e \
             JOIN schedules s ON s.endpoint_id = e.id \
             WHERE s.id = ?",
        )
        .bind(schedule.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(endpoint_from_row(r)?)),
            None => Ok(None),
        }
    }

    // --- Schedules ---

    async fn get_schedules(&self, endpoint: EndpointId) -> anyhow::Result<Vec<Schedule>> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE endpoint_id = ? ORDER BY id")
            .bind(endpoint.as_i64())
            .fetch_all(&self.pool)
            .await?;

        let schedules = rows
            .iter()
            .map(schedule_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    async fn modify_schedule(&self, schedule: &mut Schedule, op: ModifyOp) -> anyhow::Result<()> {
        if op != ModifyOp::Delete {
            schedule.validate()?;
        }

        match op {
            ModifyOp::Insert => {
                let id = sqlx::query(
                    "INSERT INTO schedules \
                     (endpoint_id, name, start_minute, stop_minute, stride_minutes, enabled) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(schedule.endpoint_id.as_i64())
                .bind(&schedule.name)
                .bind(schedule.start.minute_of_week())
                .bind(schedule.stop.minute_of_week())
                .bind(i64::from(schedule.stride_minutes))
                .bind(schedule.enabled)
                .execute(&self.pool)
                .await?
                .last_insert_rowid();
                schedule.id = ScheduleId::new(id);
                tracing::trace!(schedule_id = id, "Inserted schedule");
            }
            ModifyOp::Update => {
                let updated = sqlx::query(
                    "UPDATE schedules SET endpoint_id = ?, name = ?, start_minute = ?, \
                     stop_minute = ?, stride_minutes = ?, enabled = ? WHERE id = ?",
                )
                .bind(schedule.endpoint_id.as_i64())
                .bind(&schedule.name)
                .bind(schedule.start.minute_of_week())
                .bind(schedule.stop.minute_of_week())
                .bind(i64::from(schedule.stride_minutes))
                .bind(schedule.enabled)
                .bind(schedule.id.as_i64())
                .execute(&self.pool)
                .await?
                .rows_affected();
                if updated == 0 {
                    return Err(StoreError::NotFound(format!("schedule {}", schedule.id)).into());
                }
                tracing::trace!(schedule_id = %schedule.id, "Updated schedule");
            }
            ModifyOp::Delete => {
                sqlx::query("DELETE FROM schedules WHERE id = ?")
                    .bind(schedule.id.as_i64())
                    .execute(&self.pool)
                    .await?;
                tracing::trace!(schedule_id = %schedule.id, "Deleted schedule");
            }
        }
        Ok(())
    }

    async fn get_next_sync(&self, instance: InstanceId) -> anyhow::Result<Option<NextSync>> {
        let schedules = self.instance_schedules(instance).await?;
        // Schedule windows are wall-clock times of this machine
        let next = next_due(&schedules, &Local::now());

        if let Some(NextSync::Scheduled {
            endpoint_id, due, ..
        }) = &next
        {
            sqlx::query("UPDATE endpoints SET next_sync = ? WHERE id = ?")
                .bind(format_time(due))
                .bind(endpoint_id.as_i64())
                .execute(&self.pool)
                .await?;
        }
        Ok(next)
    }

    // --- Run history ---

    async fn log_activation(&self, result: &SyncResult) -> anyhow::Result<()> {
        let run_id = self.record_run(result).await?;
        tracing::debug!(
            run_id,
            endpoint_id = %result.endpoint_id,
            tag = result.run_id(),
            "Logged activation without transfers"
        );
        Ok(())
    }

    async fn log_sync(&self, result: &SyncResult) -> anyhow::Result<()> {
        let run_id = self.record_run(result).await?;
        tracing::debug!(
            run_id,
            endpoint_id = %result.endpoint_id,
            files = result.files.len(),
            "Logged transfer run"
        );
        Ok(())
    }

    async fn verify_file(&self, probe: &FileProbe) -> anyhow::Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM transferred_files \
             WHERE instance_id = ? AND name = ? AND size = ? AND modified = ? \
             LIMIT 1",
        )
        .bind(probe.instance_id.as_i64())
        .bind(&probe.name)
        .bind(probe.size as i64)
        .bind(format_time(&probe.modified))
        .fetch_optional(&self.pool)
        .await?;

        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_time_round_trip_drops_subseconds() {
        let at = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::milliseconds(250);
        let stored = format_time(&at);
        assert_eq!(stored, "2024-03-04T05:06:07Z");
        assert_eq!(
            parse_time(&stored).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap()
        );
    }

    #[test]
    fn test_parse_optional_time_treats_empty_as_none() {
        assert_eq!(parse_optional_time(None).unwrap(), None);
        assert_eq!(parse_optional_time(Some(String::new())).unwrap(), None);
        assert!(parse_optional_time(Some("yesterday".into())).is_err());
    }
}
