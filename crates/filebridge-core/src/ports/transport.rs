//! Protocol transport port (driven/secondary port)
//!
//! One contract over every supported wire protocol. A transport instance is
//! bound to a single endpoint and holds at most one open session.
//!
//! ## Design Notes
//!
//! - Uses the typed [`TransferError`] rather than `anyhow` so the session
//!   can tell connection, authentication and directory failures apart.
//! - Methods take `&mut self`: a session is driven sequentially by one
//!   transfer run and is never shared.
//! - `Sync` is required so a session future holding `&self` stays `Send`.
//! - Transports do not retry.

use std::path::Path;

use crate::domain::{Endpoint, FileEntry, Protocol, TransferError};

/// Port trait for a connected file-transfer session
#[async_trait::async_trait]
pub trait ITransport: Send + Sync {
    /// Authenticates and changes into the endpoint's remote directory
    async fn connect(&mut self) -> Result<(), TransferError>;

    /// Regular files in the remote directory, in server order
    async fn list_files(&mut self) -> Result<Vec<FileEntry>, TransferError>;

    /// Copies `remote_dir/name` to `local_dir/name`; returns bytes written
    async fn fetch_one(&mut self, name: &str) -> Result<u64, TransferError>;

    /// Copies `local_file` to `remote_dir/<file name>`; returns bytes written
    async fn store_one(&mut self, local_file: &Path) -> Result<u64, TransferError>;

    /// Size of `remote_dir/name`, or `None` when absent
    async fn remote_size(&mut self, name: &str) -> Result<Option<u64>, TransferError>;

    /// Closes the session; failures are ignored
    async fn disconnect(&mut self);

    /// Protocol spoken by this transport
    fn protocol(&self) -> Protocol;
}

/// Maps an endpoint's protocol to a transport implementation
pub trait ITransportFactory: Send + Sync {
    /// Builds an unconnected transport for `endpoint`
    fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn ITransport>, TransferError>;
}
