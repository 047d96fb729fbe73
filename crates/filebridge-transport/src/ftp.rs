//! FTP and FTPS transport
//!
//! Both variants share one implementation over `suppaftp`. The secure
//! variant upgrades the control channel with `AUTH TLS` before logging in;
//! after that the two behave identically. Data connections are always
//! passive.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use suppaftp::list::File as ListEntry;
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::{FileType, FormatControl};
use suppaftp::{FtpError, FtpStream, Mode, NativeTlsConnector, NativeTlsFtpStream};
use tracing::{debug, instrument, warn};

use filebridge_core::domain::{
    Endpoint, FileEntry, Protocol, RemoteDir, Secret, TransferError, TransferMode,
};
use filebridge_core::ports::ITransport;

use crate::{
    file_name_of, put_session, take_session, with_session, write_atomically, SessionSlot,
};

const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Open control connection, plain or TLS-protected
enum FtpConn {
    Plain(FtpStream),
    Secure(NativeTlsFtpStream),
}

/// Dispatches the same body over either stream type
macro_rules! on_stream {
    ($conn:expr, $s:ident => $body:expr) => {
        match $conn {
            FtpConn::Plain($s) => $body,
            FtpConn::Secure($s) => $body,
        }
    };
}

/// Everything needed to dial and log in, detached from the endpoint
#[derive(Clone)]
struct FtpParams {
    address: String,
    host: String,
    username: String,
    password: String,
    remote_dir: RemoteDir,
    local_dir: PathBuf,
    file_type: FileType,
    secure: bool,
}

/// FTP/FTPS implementation of [`ITransport`]
pub struct FtpTransport {
    params: FtpParams,
    conn: SessionSlot<FtpConn>,
}

impl FtpTransport {
    /// Plain FTP transport for `endpoint`
    pub fn plain(endpoint: &Endpoint) -> Result<Self, TransferError> {
        Self::new(endpoint, false)
    }

    /// Explicit FTPS transport for `endpoint`
    pub fn secure(endpoint: &Endpoint) -> Result<Self, TransferError> {
        Self::new(endpoint, true)
    }

    fn new(endpoint: &Endpoint, secure: bool) -> Result<Self, TransferError> {
        let (username, password) = match &endpoint.credentials.secret {
            Secret::Password { password } => {
                (endpoint.credentials.username.clone(), password.clone())
            }
            Secret::None => (ANONYMOUS_USER.to_string(), ANONYMOUS_PASSWORD.to_string()),
            Secret::PrivateKey { .. } => {
                return Err(TransferError::Configuration(
                    "FTP endpoints cannot authenticate with a private key".to_string(),
                ))
            }
        };
        let username = if username.is_empty() {
            ANONYMOUS_USER.to_string()
        } else {
            username
        };
        let file_type = match endpoint.transfer_mode {
            TransferMode::Ascii => FileType::Ascii(FormatControl::Default),
            TransferMode::Binary => FileType::Binary,
        };

        Ok(Self {
            params: FtpParams {
                address: endpoint.address(),
                host: endpoint.host.clone(),
                username,
                password,
                remote_dir: endpoint.remote_dir.clone(),
                local_dir: endpoint.local_dir().clone(),
                file_type,
                secure,
            },
            conn: SessionSlot::default(),
        })
    }

    fn open(params: &FtpParams) -> Result<FtpConn, TransferError> {
        let connect_err = |e: FtpError| TransferError::Connect {
            host: params.address.clone(),
            message: e.to_string(),
        };

        let mut conn = if params.secure {
            let tls = TlsConnector::new().map_err(|e| TransferError::Connect {
                host: params.address.clone(),
                message: format!("TLS setup failed: {e}"),
            })?;
            let stream = NativeTlsFtpStream::connect(params.address.as_str())
                .map_err(connect_err)?
                .into_secure(NativeTlsConnector::from(tls), &params.host)
                .map_err(connect_err)?;
            FtpConn::Secure(stream)
        } else {
            FtpConn::Plain(FtpStream::connect(params.address.as_str()).map_err(connect_err)?)
        };

        on_stream!(&mut conn, s => {
            s.login(params.username.as_str(), params.password.as_str())
                .map_err(|e| TransferError::Authentication {
                    user: params.username.clone(),
                    message: e.to_string(),
                })?;
            s.set_mode(Mode::Passive);
            s.transfer_type(params.file_type.clone())
                .map_err(|e| TransferError::Remote(e.to_string()))?;
            s.cwd(params.remote_dir.as_str())
                .map_err(|_| TransferError::DirectoryNotFound(params.remote_dir.to_string()))?;
        });

        Ok(conn)
    }
}

#[async_trait::async_trait]
impl ITransport for FtpTransport {
    #[instrument(skip(self))]
    async fn connect(&mut self) -> Result<(), TransferError> {
        let params = self.params.clone();
        let conn = tokio::task::spawn_blocking(move || Self::open(&params))
            .await
            .map_err(|e| TransferError::Remote(format!("connect task failed: {e}")))??;
        put_session(&self.conn, conn)?;
        debug!(
            address = %self.params.address,
            secure = self.params.secure,
            "FTP session established"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_files(&mut self) -> Result<Vec<FileEntry>, TransferError> {
        let entries = with_session(&self.conn, |conn| {
            let lines = on_stream!(conn, s => s.list(None))
                .map_err(|e| TransferError::Remote(format!("LIST failed: {e}")))?;
            Ok(parse_listing(&lines))
        })
        .await?;
        debug!(count = entries.len(), "Listed remote directory");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn fetch_one(&mut self, name: &str) -> Result<u64, TransferError> {
        let name = name.to_string();
        let target = self.params.local_dir.join(&name);
        with_session(&self.conn, move |conn| {
            write_atomically(&target, &name, |file| {
                on_stream!(conn, s => s.retr(name.as_str(), |reader: &mut dyn Read| {
                    io::copy(reader, &mut *file).map_err(FtpError::ConnectionError)
                }))
                .map_err(|e| TransferError::file(&name, e))
            })
        })
        .await
    }

    #[instrument(skip(self), fields(file = %local_file.display()))]
    async fn store_one(&mut self, local_file: &Path) -> Result<u64, TransferError> {
        let name = file_name_of(local_file)?;
        let source = local_file.to_path_buf();
        with_session(&self.conn, move |conn| {
            let mut reader =
                std::fs::File::open(&source).map_err(|e| TransferError::file(&name, e))?;
            on_stream!(conn, s => s.put_file(name.as_str(), &mut reader))
                .map_err(|e| TransferError::file(&name, e))
        })
        .await
    }

    async fn remote_size(&mut self, name: &str) -> Result<Option<u64>, TransferError> {
        let name = name.to_string();
        with_session(&self.conn, move |conn| {
            match on_stream!(conn, s => s.size(name.as_str())) {
                Ok(size) => Ok(Some(size as u64)),
                // 550 and friends: the file is not there
                Err(FtpError::UnexpectedResponse(_)) => Ok(None),
                Err(e) => Err(TransferError::Remote(format!("SIZE {name} failed: {e}"))),
            }
        })
        .await
    }

    async fn disconnect(&mut self) {
        if let Some(mut conn) = take_session(&self.conn) {
            let result = tokio::task::spawn_blocking(move || on_stream!(&mut conn, s => s.quit()))
                .await;
            if let Ok(Err(e)) = result {
                warn!(error = %e, "FTP QUIT failed");
            }
        }
    }

    fn protocol(&self) -> Protocol {
        if self.params.secure {
            Protocol::TlsFtp
        } else {
            Protocol::PlainFtp
        }
    }
}

/// Parses `LIST` output, keeping regular files only
///
/// Lines the parser does not understand (totals, banners) are skipped.
fn parse_listing(lines: &[String]) -> Vec<FileEntry> {
    lines
        .iter()
        .filter_map(|line| ListEntry::from_str(line).ok())
        .filter(|entry| entry.is_file())
        .map(|entry| {
            FileEntry::new(
                entry.name(),
                entry.size() as u64,
                DateTime::<Utc>::from(entry.modified()),
            )
        })
        .collect()
}
