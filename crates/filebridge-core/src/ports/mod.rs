//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the domain core
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ITransferRepository`] - Endpoint/schedule configuration and transfer history
//! - [`ITransport`] / [`ITransportFactory`] - Protocol sessions (FTP, FTPS, SFTP, local copy)
//! - [`INotificationSink`] - Status and per-file transfer events

pub mod notification;
pub mod repository;
pub mod transport;

pub use notification::{ChannelSink, INotificationSink, Notifier, NullSink, StatusKind, SyncEvent};
pub use repository::{ITransferRepository, ModifyOp};
pub use transport::{ITransport, ITransportFactory};
