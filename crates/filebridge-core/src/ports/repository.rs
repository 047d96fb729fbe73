//! Transfer repository port (driven/secondary port)
//!
//! This module defines the interface for reading endpoint and schedule
//! configuration and for recording the outcome of transfer runs.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   (SQLite, a remote service, an in-memory double) and the core only
//!   reports them; it never branches on their cause.
//! - Endpoint and schedule records are owned by the CRUD layer. The core
//!   reads them and, on insert, receives the generated id back through the
//!   `&mut` model.
//! - Run results are write-only from the core's point of view.

use crate::domain::{
    Endpoint, EndpointId, FileProbe, InstanceId, NextSync, Schedule, ScheduleId, SyncResult,
};

/// Kind of change applied by `modify_endpoint` / `modify_schedule`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    /// Create the record and write the generated id back into the model
    Insert,
    /// Overwrite the record with the model's id
    Update,
    /// Remove the record with the model's id
    Delete,
}

/// Port trait for endpoint/schedule configuration and transfer history
///
/// ## Implementation Notes
///
/// - `get_next_sync` returns `None` only when the instance has no enabled,
///   valid schedule at all. When the earliest run falls beyond the current
///   week boundary it returns [`NextSync::Rollover`] at that boundary.
/// - `log_activation` records a run that transferred nothing;
///   `log_sync` records the transferred files and bumps the endpoint's
///   last-sync time.
/// - `verify_file` returns `true` if a transfer with the probe's
///   (instance, name, size, modified) was recorded before.
#[async_trait::async_trait]
pub trait ITransferRepository: Send + Sync {
    /// Registers (or looks up) the worker instance for `hostname`
    async fn init_instance(&self, hostname: &str) -> anyhow::Result<InstanceId>;

    /// All endpoints owned by an instance
    async fn get_endpoints(&self, instance: InstanceId) -> anyhow::Result<Vec<Endpoint>>;

    /// All schedules bound to an endpoint
    async fn get_schedules(&self, endpoint: EndpointId) -> anyhow::Result<Vec<Schedule>>;

    /// Inserts, updates or deletes an endpoint
    async fn modify_endpoint(&self, endpoint: &mut Endpoint, op: ModifyOp) -> anyhow::Result<()>;

    /// Inserts, updates or deletes a schedule
    async fn modify_schedule(&self, schedule: &mut Schedule, op: ModifyOp) -> anyhow::Result<()>;

    /// Earliest due item across the instance's enabled schedules
    async fn get_next_sync(&self, instance: InstanceId) -> anyhow::Result<Option<NextSync>>;

    /// Endpoint bound to a schedule, if any
    async fn select_endpoint(&self, schedule: ScheduleId) -> anyhow::Result<Option<Endpoint>>;

    /// Records a run that transferred no files
    async fn log_activation(&self, result: &SyncResult) -> anyhow::Result<()>;

    /// Records a run together with its transferred files
    async fn log_sync(&self, result: &SyncResult) -> anyhow::Result<()>;

    /// True if a matching transfer was recorded before
    async fn verify_file(&self, probe: &FileProbe) -> anyhow::Result<bool>;
}
