//! Domain newtypes
//!
//! Strongly-typed wrappers for database-row identifiers and the normalized
//! remote directory path.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Row ID types
// ============================================================================

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Create an identifier from a raw row id
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner i64 value
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<i64>()
                    .map(Self)
                    .map_err(|e| DomainError::InvalidId(format!("{}: {e}", stringify!($name))))
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of a registered worker instance (one per host)
    InstanceId
);

row_id!(
    /// Identifier of an [`Endpoint`](super::Endpoint)
    EndpointId
);

row_id!(
    /// Identifier of a [`Schedule`](super::Schedule)
    ScheduleId
);

// ============================================================================
// RemoteDir
// ============================================================================

/// A remote directory path, always beginning with `/`
///
/// Construction normalizes instead of rejecting: a missing leading separator
/// is added, backslashes become forward slashes and trailing separators are
/// trimmed (except for the root itself).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RemoteDir(String);

impl RemoteDir {
    /// Create a normalized remote directory
    pub fn new(path: impl AsRef<str>) -> Self {
        let mut normalized = path.as_ref().trim().replace('\\', "/");
        if !normalized.starts_with('/') {
            normalized.insert(0, '/');
        }
        while normalized.len() > 1 && normalized.ends_with('/') {
            normalized.pop();
        }
        Self(normalized)
    }

    /// The root directory `/`
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Full remote path of a file inside this directory
    #[must_use]
    pub fn file_path(&self, name: &str) -> String {
        if self.0 == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.0)
        }
    }
}

impl Default for RemoteDir {
    fn default() -> Self {
        Self::root()
    }
}

impl Display for RemoteDir {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RemoteDir {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for RemoteDir {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<RemoteDir> for String {
    fn from(dir: RemoteDir) -> Self {
        dir.0
    }
}
