//! FileBridge Store - SQLite persistence
//!
//! SQLite-backed storage for:
//! - Worker instances
//! - Endpoints and their weekly schedules
//! - Transfer runs and the files each run moved
//!
//! ## Architecture
//!
//! This crate implements the `ITransferRepository` port from
//! `filebridge-core`. It is a driven (secondary) adapter in the hexagonal
//! architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteTransferRepository`] - Full `ITransferRepository` implementation
//! - [`StoreError`] - Error types for store operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use filebridge_store::{DatabasePool, SqliteTransferRepository};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/var/lib/filebridge/filebridge.db")).await?;
//! let repo = SqliteTransferRepository::new(pool.pool().clone());
//! // Use repo as ITransferRepository...
//! # Ok(())
//! # }
//! ```

pub mod pool;
pub mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteTransferRepository;

/// Errors that can occur during store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be mapped to a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An update or delete addressed a row that does not exist
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}
