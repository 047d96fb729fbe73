//! Endpoint entity
//!
//! An [`Endpoint`] is a configured remote location: where to connect, how to
//! authenticate, which protocol to speak, and which local directory the
//! transferred files come from or go to.
//!
//! ## Invariants
//!
//! - The remote directory always begins with `/` (see [`RemoteDir`]).
//! - The local directory always ends with the platform path separator.
//! - The local directory must exist before any transfer is attempted; this
//!   is checked by the transfer session, not at construction, because the
//!   directory may be created after the endpoint is configured.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::path::{PathBuf, MAIN_SEPARATOR, MAIN_SEPARATOR_STR};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{EndpointId, InstanceId, RemoteDir};

// ============================================================================
// Protocol
// ============================================================================

/// Wire protocol used to reach an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// Unencrypted FTP, passive mode
    PlainFtp,
    /// Explicit FTPS (AUTH TLS), passive mode
    TlsFtp,
    /// SSH file transfer
    Sftp,
    /// Copy between two local directories
    LocalCopy,
}

impl Protocol {
    /// Stable numeric code used by storage adapters
    pub fn code(&self) -> i64 {
        match self {
            Protocol::PlainFtp => 0,
            Protocol::TlsFtp => 1,
            Protocol::Sftp => 2,
            Protocol::LocalCopy => 3,
        }
    }

    /// Decode a storage code
    pub fn from_code(code: i64) -> Result<Self, DomainError> {
        match code {
            0 => Ok(Protocol::PlainFtp),
            1 => Ok(Protocol::TlsFtp),
            2 => Ok(Protocol::Sftp),
            3 => Ok(Protocol::LocalCopy),
            value => Err(DomainError::UnknownCode {
                kind: "protocol",
                value,
            }),
        }
    }

    /// Port used when the endpoint does not specify one
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Protocol::PlainFtp | Protocol::TlsFtp => Some(21),
            Protocol::Sftp => Some(22),
            Protocol::LocalCopy => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::PlainFtp => "ftp",
            Protocol::TlsFtp => "ftps",
            Protocol::Sftp => "sftp",
            Protocol::LocalCopy => "local",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Direction
// ============================================================================

/// Combinable set of transfer directions
///
/// `GET` and `PUT` are executed by scheduled and manual runs;
/// `HOTFOLDER_PUT` marks the endpoint for filesystem-driven uploads only.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Direction(u8);

impl Direction {
    /// Empty set
    pub const NONE: Direction = Direction(0);
    /// Download remote files into the local directory
    pub const GET: Direction = Direction(1);
    /// Upload local files to the remote directory
    pub const PUT: Direction = Direction(2);
    /// Upload files as they appear in the local directory
    pub const HOTFOLDER_PUT: Direction = Direction(4);

    const ALL_BITS: u8 = 0b111;

    /// Build a set from raw bits, ignoring unknown bits
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Direction(bits & Self::ALL_BITS)
    }

    /// Raw bits
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// True if every direction in `other` is present
    pub const fn contains(&self, other: Direction) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// True if no direction is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Directions executed by scheduled and manual runs, in execution order
    pub fn scheduled(&self) -> Vec<Direction> {
        [Direction::GET, Direction::PUT]
            .into_iter()
            .filter(|d| self.contains(*d))
            .collect()
    }

    fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Direction::GET) {
            names.push("Get");
        }
        if self.contains(Direction::PUT) {
            names.push("Put");
        }
        if self.contains(Direction::HOTFOLDER_PUT) {
            names.push("HotfolderPut");
        }
        names
    }
}

impl BitOr for Direction {
    type Output = Direction;

    fn bitor(self, rhs: Direction) -> Direction {
        Direction(self.0 | rhs.0)
    }
}

impl BitOrAssign for Direction {
    fn bitor_assign(&mut self, rhs: Direction) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "None");
        }
        write!(f, "{}", self.names().join("|"))
    }
}

impl fmt::Debug for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Direction({})", self)
    }
}

// ============================================================================
// TransferMode
// ============================================================================

/// FTP representation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Text transfer with line-ending translation
    Ascii,
    /// Byte-exact transfer
    #[default]
    Binary,
}

impl TransferMode {
    /// Stable numeric code used by storage adapters
    pub fn code(&self) -> i64 {
        match self {
            TransferMode::Ascii => 0,
            TransferMode::Binary => 1,
        }
    }

    /// Decode a storage code
    pub fn from_code(code: i64) -> Result<Self, DomainError> {
        match code {
            0 => Ok(TransferMode::Ascii),
            1 => Ok(TransferMode::Binary),
            value => Err(DomainError::UnknownCode {
                kind: "transfer mode",
                value,
            }),
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Private key material in its at-rest, scrambled form
///
/// The content is opaque to the domain; `filebridge-transport` knows how to
/// restore the key. Scrambling is obfuscation, not encryption.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScrambledSecret(String);

impl ScrambledSecret {
    /// Wrap an already-scrambled blob
    pub fn new(blob: impl Into<String>) -> Self {
        Self(blob.into())
    }

    /// The scrambled text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ScrambledSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScrambledSecret({} bytes)", self.0.len())
    }
}

/// How a user proves its identity to the endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Secret {
    /// Anonymous or no secret required (local copy)
    #[default]
    None,
    /// Plain password
    Password {
        /// The password
        password: String,
    },
    /// SSH private key, scrambled at rest
    PrivateKey {
        /// Scrambled PEM key material
        key: ScrambledSecret,
        /// Passphrase protecting the key, if any
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::None => write!(f, "None"),
            Secret::Password { .. } => write!(f, "Password(***)"),
            Secret::PrivateKey { key, .. } => write!(f, "PrivateKey({:?})", key),
        }
    }
}

/// User name plus secret
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Login name
    pub username: String,
    /// Password or key
    pub secret: Secret,
}

impl Credentials {
    /// Username/password pair
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: Secret::Password {
                password: password.into(),
            },
        }
    }

    /// Username/private-key pair
    pub fn private_key(
        username: impl Into<String>,
        key: ScrambledSecret,
        passphrase: Option<String>,
    ) -> Self {
        Self {
            username: username.into(),
            secret: Secret::PrivateKey { key, passphrase },
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// A configured remote location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique id (0 until inserted)
    pub id: EndpointId,
    /// Worker instance owning this endpoint
    pub instance_id: InstanceId,
    /// Host name or address (for local copy: unused)
    pub host: String,
    /// Explicit port, `None` for the protocol default
    pub port: Option<u16>,
    /// Login credentials
    pub credentials: Credentials,
    /// Wire protocol
    pub protocol: Protocol,
    /// Directions to execute
    pub direction: Direction,
    /// FTP representation type
    pub transfer_mode: TransferMode,
    /// Normalized remote directory
    pub remote_dir: RemoteDir,
    /// Local directory, always ending with a separator
    local_dir: PathBuf,
    /// Last successful synchronization
    pub last_sync: Option<DateTime<Utc>>,
    /// Next planned synchronization
    pub next_sync: Option<DateTime<Utc>>,
}

impl Endpoint {
    /// Create an endpoint with normalized directories
    ///
    /// Credentials default to none, direction to `GET`, mode to binary.
    pub fn new(
        id: EndpointId,
        instance_id: InstanceId,
        protocol: Protocol,
        host: impl Into<String>,
        remote_dir: impl AsRef<str>,
        local_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id,
            instance_id,
            host: host.into(),
            port: None,
            credentials: Credentials::default(),
            protocol,
            direction: Direction::GET,
            transfer_mode: TransferMode::Binary,
            remote_dir: RemoteDir::new(remote_dir),
            local_dir: normalize_local_dir(local_dir.into()),
            last_sync: None,
            next_sync: None,
        }
    }

    /// Set the credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the direction set
    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the transfer mode
    pub fn with_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.transfer_mode = mode;
        self
    }

    /// Set an explicit port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the last-sync reference time
    pub fn with_last_sync(mut self, last_sync: DateTime<Utc>) -> Self {
        self.last_sync = Some(last_sync);
        self
    }

    /// Local directory (ends with a separator)
    pub fn local_dir(&self) -> &PathBuf {
        &self.local_dir
    }

    /// Replace the local directory, normalizing it
    pub fn set_local_dir(&mut self, dir: impl Into<PathBuf>) {
        self.local_dir = normalize_local_dir(dir.into());
    }

    /// `host:port` string used for dialling
    pub fn address(&self) -> String {
        match self.port.or_else(|| self.protocol.default_port()) {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Short label used in status messages
    pub fn label(&self) -> String {
        match self.protocol {
            Protocol::LocalCopy => format!("local:{}", self.remote_dir),
            _ => format!("{}://{}{}", self.protocol, self.address(), self.remote_dir),
        }
    }
}

/// Appends the platform separator to a directory path if missing
fn normalize_local_dir(dir: PathBuf) -> PathBuf {
    if dir.as_os_str().is_empty() {
        return dir;
    }
    let ends_with_separator = dir
        .to_string_lossy()
        .ends_with(|c: char| c == MAIN_SEPARATOR || c == '/');
    if ends_with_separator {
        dir
    } else {
        let mut s = dir.into_os_string();
        s.push(MAIN_SEPARATOR_STR);
        PathBuf::from(s)
    }
}
