//! SFTP transport
//!
//! Opens an SSH session with `ssh2`, authenticates with a password or a
//! scrambled private key, and drives the SFTP subsystem.

use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use ssh2::{ErrorCode, Session, Sftp};
use tracing::{debug, instrument, warn};

use filebridge_core::domain::{Endpoint, FileEntry, Protocol, RemoteDir, Secret, TransferError};
use filebridge_core::ports::ITransport;

use crate::secret::SecretScrambler;
use crate::{
    file_name_of, put_session, take_session, with_session, write_atomically, SessionSlot,
};

/// `LIBSSH2_FX_NO_SUCH_FILE`
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Open SSH session plus its SFTP channel
struct SftpConn {
    session: Session,
    sftp: Sftp,
}

/// Restored authentication material
#[derive(Clone)]
enum Auth {
    Password(String),
    Key {
        pem: String,
        passphrase: Option<String>,
    },
}

/// SFTP implementation of [`ITransport`]
pub struct SftpTransport {
    address: String,
    username: String,
    auth: Auth,
    remote_dir: RemoteDir,
    local_dir: PathBuf,
    conn: SessionSlot<SftpConn>,
}

impl SftpTransport {
    /// Builds a transport for `endpoint`, restoring its private key if any
    pub fn new(
        endpoint: &Endpoint,
        scrambler: Arc<dyn SecretScrambler>,
    ) -> Result<Self, TransferError> {
        let auth = match &endpoint.credentials.secret {
            Secret::Password { password } => Auth::Password(password.clone()),
            Secret::PrivateKey { key, passphrase } => Auth::Key {
                pem: scrambler
                    .unscramble(key)
                    .map_err(|e| TransferError::Configuration(e.to_string()))?,
                passphrase: passphrase.clone(),
            },
            Secret::None => {
                return Err(TransferError::Configuration(
                    "SFTP endpoints need a password or a private key".to_string(),
                ))
            }
        };

        Ok(Self {
            address: endpoint.address(),
            username: endpoint.credentials.username.clone(),
            auth,
            remote_dir: endpoint.remote_dir.clone(),
            local_dir: endpoint.local_dir().clone(),
            conn: SessionSlot::default(),
        })
    }

    fn open(
        address: &str,
        username: &str,
        auth: &Auth,
        remote_dir: &RemoteDir,
    ) -> Result<SftpConn, TransferError> {
        let connect_err = |message: String| TransferError::Connect {
            host: address.to_string(),
            message,
        };

        let tcp = TcpStream::connect(address).map_err(|e| connect_err(e.to_string()))?;
        let mut session = Session::new().map_err(|e| connect_err(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| connect_err(format!("SSH handshake failed: {e}")))?;

        let auth_result = match auth {
            Auth::Password(password) => session.userauth_password(username, password),
            Auth::Key { pem, passphrase } => {
                session.userauth_pubkey_memory(username, None, pem, passphrase.as_deref())
            }
        };
        if let Err(e) = auth_result {
            return Err(TransferError::Authentication {
                user: username.to_string(),
                message: e.to_string(),
            });
        }
        if !session.authenticated() {
            return Err(TransferError::Authentication {
                user: username.to_string(),
                message: "server did not accept the credentials".to_string(),
            });
        }

        let sftp = session
            .sftp()
            .map_err(|e| connect_err(format!("SFTP subsystem unavailable: {e}")))?;

        match sftp.stat(Path::new(remote_dir.as_str())) {
            Ok(stat) if stat.is_dir() => {}
            _ => return Err(TransferError::DirectoryNotFound(remote_dir.to_string())),
        }

        Ok(SftpConn { session, sftp })
    }
}

#[async_trait::async_trait]
impl ITransport for SftpTransport {
    #[instrument(skip(self))]
    async fn connect(&mut self) -> Result<(), TransferError> {
        let address = self.address.clone();
        let username = self.username.clone();
        let auth = self.auth.clone();
        let remote_dir = self.remote_dir.clone();
        let conn = tokio::task::spawn_blocking(move || {
            Self::open(&address, &username, &auth, &remote_dir)
        })
        .await
        .map_err(|e| TransferError::Remote(format!("connect task failed: {e}")))??;
        put_session(&self.conn, conn)?;
        debug!(address = %self.address, user = %self.username, "SFTP session established");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_files(&mut self) -> Result<Vec<FileEntry>, TransferError> {
        let dir = PathBuf::from(self.remote_dir.as_str());
        with_session(&self.conn, move |conn| {
            let entries = conn
                .sftp
                .readdir(&dir)
                .map_err(|e| TransferError::Remote(format!("readdir failed: {e}")))?;
            Ok(entries
                .into_iter()
                .filter(|(_, stat)| stat.is_file())
                .filter_map(|(path, stat)| {
                    let name = path.file_name()?.to_str()?.to_string();
                    let modified = stat
                        .mtime
                        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
                        .unwrap_or_default();
                    Some(FileEntry::new(name, stat.size.unwrap_or(0), modified))
                })
                .collect())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn fetch_one(&mut self, name: &str) -> Result<u64, TransferError> {
        let name = name.to_string();
        let remote = PathBuf::from(self.remote_dir.file_path(&name));
        let target = self.local_dir.join(&name);
        with_session(&self.conn, move |conn| {
            let mut source = conn
                .sftp
                .open(&remote)
                .map_err(|e| TransferError::file(&name, e))?;
            write_atomically(&target, &name, |file| {
                io::copy(&mut source, file).map_err(|e| TransferError::file(&name, e))
            })
        })
        .await
    }

    #[instrument(skip(self), fields(file = %local_file.display()))]
    async fn store_one(&mut self, local_file: &Path) -> Result<u64, TransferError> {
        let name = file_name_of(local_file)?;
        let remote = PathBuf::from(self.remote_dir.file_path(&name));
        let source = local_file.to_path_buf();
        with_session(&self.conn, move |conn| {
            let mut reader =
                std::fs::File::open(&source).map_err(|e| TransferError::file(&name, e))?;
            let mut sink = conn
                .sftp
                .create(&remote)
                .map_err(|e| TransferError::file(&name, e))?;
            io::copy(&mut reader, &mut sink).map_err(|e| TransferError::file(&name, e))
        })
        .await
    }

    async fn remote_size(&mut self, name: &str) -> Result<Option<u64>, TransferError> {
        let remote = PathBuf::from(self.remote_dir.file_path(name));
        with_session(&self.conn, move |conn| match conn.sftp.stat(&remote) {
            Ok(stat) => Ok(Some(stat.size.unwrap_or(0))),
            Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(None),
            Err(e) => Err(TransferError::Remote(format!(
                "stat {} failed: {e}",
                remote.display()
            ))),
        })
        .await
    }

    async fn disconnect(&mut self) {
        if let Some(conn) = take_session(&self.conn) {
            let result = tokio::task::spawn_blocking(move || {
                drop(conn.sftp);
                conn.session.disconnect(None, "closing", None)
            })
            .await;
            if let Ok(Err(e)) = result {
                warn!(error = %e, "SSH disconnect failed");
            }
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Sftp
    }
}
