//! Context passed to every transfer component
//!
//! There are no process-wide singletons: the worker instance, the transfer
//! settings and the notification sink travel together in a [`SyncContext`]
//! handed to the dispatcher, sessions and hotfolder watchers at construction.

use filebridge_core::config::SyncConfig;
use filebridge_core::domain::InstanceId;
use filebridge_core::ports::Notifier;

/// Instance identity, transfer settings and event sink
#[derive(Debug, Clone)]
pub struct SyncContext {
    /// Worker instance performing the transfers
    pub instance_id: InstanceId,
    /// Qualification policy, verification, hotfolder cadence, timeouts
    pub settings: SyncConfig,
    /// Where status and per-file events go
    pub notifier: Notifier,
}

impl SyncContext {
    /// Bundles the three pieces
    pub fn new(instance_id: InstanceId, settings: SyncConfig, notifier: Notifier) -> Self {
        Self {
            instance_id,
            settings,
            notifier,
        }
    }
}
