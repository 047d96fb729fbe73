//! FileBridge Core - Domain model, ports and configuration
//!
//! This crate is the hexagonal core shared by every other FileBridge crate:
//! - **Domain entities** - `Endpoint`, `Schedule`, `NextSync`, `SyncResult`, `TransferredFile`
//! - **Port definitions** - `ITransferRepository`, `ITransport`, `ITransportFactory`, `INotificationSink`
//! - **Configuration** - YAML-backed `Config` with validation and a builder
//!
//! # Architecture
//!
//! The domain module is pure data and scheduling arithmetic. Ports define
//! the trait interfaces implemented by the adapter crates
//! (`filebridge-transport`, `filebridge-store`) and consumed by the
//! orchestration crate (`filebridge-sync`).

pub mod config;
pub mod domain;
pub mod ports;
