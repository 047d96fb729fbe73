//! Notification sink port (driven/secondary port)
//!
//! Status and progress events raised by the transfer subsystem are handed
//! to an [`INotificationSink`] passed at construction. There is no global
//! event bus.
//!
//! ## Design Notes
//!
//! - Publishing is synchronous and non-blocking; sinks must not await.
//! - [`Notifier`] wraps a sink and mirrors every event to `tracing`, so
//!   logs carry the same information as the UI channel.
//! - [`ChannelSink`] forwards events over an unbounded tokio channel; a
//!   closed receiver is not an error.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{Direction, TransferredFile};

// ============================================================================
// SyncEvent
// ============================================================================

/// Severity/category of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    /// When the next transfer will happen
    NextSyncInfo,
    /// Informational progress
    InfoMessage,
    /// Something unexpected that did not stop the run
    Warning,
    /// Configuration, precondition or repository failure
    Error,
    /// A transport failure aborted a run
    TransferError,
    /// Summary of transferred files
    FileTransferredInfo,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusKind::NextSyncInfo => "next-sync",
            StatusKind::InfoMessage => "info",
            StatusKind::Warning => "warning",
            StatusKind::Error => "error",
            StatusKind::TransferError => "transfer-error",
            StatusKind::FileTransferredInfo => "transferred",
        };
        write!(f, "{}", s)
    }
}

/// Event published by sessions, the dispatcher and hotfolder watchers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SyncEvent {
    /// Free-form status line
    Status {
        /// Category of the message
        kind: StatusKind,
        /// Human-readable text
        message: String,
    },
    /// A single file was transferred
    FileTransferred {
        /// Direction of the transfer
        direction: Direction,
        /// The transferred file
        file: TransferredFile,
    },
}

impl SyncEvent {
    /// Builds a status event
    pub fn status(kind: StatusKind, message: impl Into<String>) -> Self {
        SyncEvent::Status {
            kind,
            message: message.into(),
        }
    }

    /// Status kind, if this is a status event
    pub fn kind(&self) -> Option<StatusKind> {
        match self {
            SyncEvent::Status { kind, .. } => Some(*kind),
            SyncEvent::FileTransferred { .. } => None,
        }
    }
}

// ============================================================================
// INotificationSink
// ============================================================================

/// Port trait receiving sync events
pub trait INotificationSink: Send + Sync {
    /// Delivers one event
    fn publish(&self, event: SyncEvent);
}

/// Sink backed by a tokio unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver draining it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl INotificationSink for ChannelSink {
    fn publish(&self, event: SyncEvent) {
        // A dropped receiver means nobody listens any more.
        let _ = self.tx.send(event);
    }
}

/// Sink that discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl INotificationSink for NullSink {
    fn publish(&self, _event: SyncEvent) {}
}

// ============================================================================
// Notifier
// ============================================================================

/// Cloneable handle publishing to a sink and mirroring to `tracing`
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn INotificationSink>,
}

impl Notifier {
    /// Wraps a sink
    pub fn new(sink: Arc<dyn INotificationSink>) -> Self {
        Self { sink }
    }

    /// Notifier that only logs
    pub fn null() -> Self {
        Self::new(Arc::new(NullSink))
    }

    /// Publishes a status event
    pub fn status(&self, kind: StatusKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            StatusKind::Error | StatusKind::TransferError => {
                tracing::error!(kind = %kind, "{}", message)
            }
            StatusKind::Warning => tracing::warn!(kind = %kind, "{}", message),
            _ => tracing::info!(kind = %kind, "{}", message),
        }
        self.sink.publish(SyncEvent::Status { kind, message });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.status(StatusKind::InfoMessage, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.status(StatusKind::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.status(StatusKind::Error, message);
    }

    pub fn transfer_error(&self, message: impl Into<String>) {
        self.status(StatusKind::TransferError, message);
    }

    /// Publishes a per-file event
    pub fn file_transferred(&self, direction: Direction, file: TransferredFile) {
        tracing::info!(
            direction = %direction,
            file = %file.name,
            size = file.size,
            "File transferred"
        );
        self.sink
            .publish(SyncEvent::FileTransferred { direction, file });
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier").finish_non_exhaustive()
    }
}
