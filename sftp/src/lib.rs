//! SFTP endpoint over russh.
//!
//! `SftpEndpoint` exposes a remote SFTP namespace through the engine's
//! endpoint trait. It advertises the accelerated capability, so jobs
//! against a local peer run as put/get against the remote, and
//! remote-to-remote jobs stream through the engine.

mod ssh;

use std::sync::Arc;

use async_trait::async_trait;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tracing::{debug, info};

use engine::endpoint::{Capabilities, Endpoint, ReadStream, WriteStream};
use engine::error::{EndpointErrorKind, SyncError};
use engine::model::{EntryKind, EntryStats};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// Connection parameters for one SFTP endpoint.
#[derive(Debug, Clone, Default)]
pub struct SftpConfig {
    /// Host name or address, optionally `host:port`.
    pub host: String,
    /// Used when `host` carries no port (default 22).
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    /// Private key file; takes precedence over `password`.
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    /// Accepted server keys (SHA256 fingerprints or base64 keys).
    /// `None` accepts any server.
    pub fingerprints: Option<Vec<String>>,
}

impl SftpConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            ..Default::default()
        }
    }

    /// Split an optional `:port` suffix off the host.
    fn host_port(&self) -> Result<(String, u16), SyncError> {
        match self.host.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| {
                    SyncError::endpoint(
                        &self.host,
                        EndpointErrorKind::Other,
                        format!("invalid port in host '{}'", self.host),
                    )
                })?;
                Ok((host.to_string(), port))
            }
            None => Ok((self.host.clone(), self.port)),
        }
    }
}

/// A remote SFTP namespace as a sync endpoint.
pub struct SftpEndpoint {
    sftp: SftpSession,
}

impl SftpEndpoint {
    /// Open an SSH session, authenticate and start the sftp subsystem.
    pub async fn connect(config: &SftpConfig) -> Result<Self, SyncError> {
        let (host, port) = config.host_port()?;
        let err = |message: String| SyncError::endpoint(&host, EndpointErrorKind::Other, message);

        let handler = ssh::SshClient {
            allowed_fingerprints: config.fingerprints.clone(),
        };
        let ssh_config = russh::client::Config::default();
        let mut session =
            russh::client::connect(Arc::new(ssh_config), (host.as_str(), port), handler)
                .await
                .map_err(|e| err(e.to_string()))?;

        let auth = if let Some(key_path) = &config.private_key {
            let key = russh::keys::load_secret_key(key_path, config.passphrase.as_deref())
                .map_err(|e| err(e.to_string()))?;
            let hash = session
                .best_supported_rsa_hash()
                .await
                .map_err(|e| err(e.to_string()))?
                .flatten();
            session
                .authenticate_publickey(
                    &config.user,
                    russh::keys::PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                )
                .await
                .map_err(|e| err(e.to_string()))?
        } else {
            session
                .authenticate_password(&config.user, config.password.as_deref().unwrap_or(""))
                .await
                .map_err(|e| err(e.to_string()))?
        };
        if let russh::client::AuthResult::Failure {
            remaining_methods, ..
        } = auth
        {
            return Err(err(format!(
                "authentication failed for {}@{host} (remaining methods: {remaining_methods:?})",
                config.user
            )));
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| err(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| err(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| err(e.to_string()))?;
        info!("sftp session open: {}@{host}:{port}", config.user);

        Ok(Self { sftp })
    }
}

/// Map an SFTP status onto the engine's endpoint classification.
fn classify(err: &SftpError) -> EndpointErrorKind {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => EndpointErrorKind::NotFound,
            StatusCode::PermissionDenied => EndpointErrorKind::PermissionDenied,
            StatusCode::OpUnsupported => EndpointErrorKind::Unsupported,
            _ => EndpointErrorKind::Other,
        },
        _ => EndpointErrorKind::Other,
    }
}

fn sftp_err(path: &str, err: SftpError) -> SyncError {
    SyncError::endpoint(path, classify(&err), err.to_string())
}

/// SFTP attributes carry the file type inside the permission bits.
fn entry_stats(attrs: &FileAttributes) -> EntryStats {
    let permissions = attrs.permissions.unwrap_or(0);
    let kind = if permissions & S_IFMT == S_IFLNK {
        EntryKind::Symlink
    } else if attrs.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };

    EntryStats {
        kind,
        size: attrs.size.unwrap_or(0),
        mtime: attrs.mtime.map(i64::from).unwrap_or(0),
        atime: attrs.atime.map(i64::from).unwrap_or(0),
        mode: attrs.permissions.map(|p| p & 0o7777),
    }
}

#[async_trait]
impl Endpoint for SftpEndpoint {
    fn name(&self) -> &str {
        "sftp"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accelerated: true,
            native_copy: false,
            set_times: true,
        }
    }

    async fn realpath(&self, path: &str) -> Result<String, SyncError> {
        self.sftp
            .canonicalize(path)
            .await
            .map_err(|e| sftp_err(path, e))
    }

    async fn stat(&self, path: &str) -> Result<EntryStats, SyncError> {
        let attrs = self
            .sftp
            .metadata(path)
            .await
            .map_err(|e| sftp_err(path, e))?;
        Ok(entry_stats(&attrs))
    }

    async fn lstat(&self, path: &str) -> Result<EntryStats, SyncError> {
        let attrs = self
            .sftp
            .symlink_metadata(path)
            .await
            .map_err(|e| sftp_err(path, e))?;
        Ok(entry_stats(&attrs))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| sftp_err(path, e))?;
        Ok(entries
            .map(|entry| entry.file_name())
            .filter(|name| name != "." && name != "..")
            .collect())
    }

    async fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<(), SyncError> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| sftp_err(path, e))?;
        if let Some(mode) = mode {
            self.set_mode(path, mode).await?;
        }
        Ok(())
    }

    async fn rmdir(&self, path: &str) -> Result<(), SyncError> {
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|e| sftp_err(path, e))
    }

    async fn unlink(&self, path: &str) -> Result<(), SyncError> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| sftp_err(path, e))
    }

    async fn open_read(&self, path: &str) -> Result<ReadStream, SyncError> {
        let file = self.sftp.open(path).await.map_err(|e| sftp_err(path, e))?;
        Ok(Box::pin(file))
    }

    async fn open_write(&self, path: &str, mode: Option<u32>) -> Result<WriteStream, SyncError> {
        let file = self
            .sftp
            .open_with_flags(
                path,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| sftp_err(path, e))?;
        if let Some(mode) = mode {
            self.set_mode(path, mode).await?;
        }
        Ok(Box::pin(file))
    }

    async fn accel_get(
        &self,
        src: &str,
        local_dst: &str,
        mode: Option<u32>,
    ) -> Result<(), SyncError> {
        debug!("sftp get {src} -> {local_dst}");
        let mut remote = self.sftp.open(src).await.map_err(|e| sftp_err(src, e))?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if let Some(mode) = mode {
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let mut local = options
            .open(local_dst)
            .await
            .map_err(|e| SyncError::io(local_dst, &e))?;

        tokio::io::copy(&mut remote, &mut local)
            .await
            .map_err(|e| SyncError::io(local_dst, &e))?;
        Ok(())
    }

    async fn accel_put(
        &self,
        local_src: &str,
        dst: &str,
        mode: Option<u32>,
    ) -> Result<(), SyncError> {
        debug!("sftp put {local_src} -> {dst}");
        let mut local = tokio::fs::File::open(local_src)
            .await
            .map_err(|e| SyncError::io(local_src, &e))?;
        let mut remote = self
            .sftp
            .open_with_flags(
                dst,
                OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
            )
            .await
            .map_err(|e| sftp_err(dst, e))?;

        tokio::io::copy(&mut local, &mut remote)
            .await
            .map_err(|e| SyncError::endpoint(dst, EndpointErrorKind::Other, e.to_string()))?;
        drop(remote);

        if let Some(mode) = mode {
            self.set_mode(dst, mode).await?;
        }
        Ok(())
    }

    async fn set_times(&self, path: &str, atime: i64, mtime: i64) -> Result<(), SyncError> {
        let attrs = FileAttributes {
            atime: Some(atime.max(0) as u32),
            mtime: Some(mtime.max(0) as u32),
            ..Default::default()
        };
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| sftp_err(path, e))
    }

    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), SyncError> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..Default::default()
        };
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| sftp_err(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh_sftp::protocol::Status;

    fn status_err(code: StatusCode) -> SftpError {
        SftpError::Status(Status {
            id: 0,
            status_code: code,
            error_message: "status".to_string(),
            language_tag: "en-US".to_string(),
        })
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            classify(&status_err(StatusCode::NoSuchFile)),
            EndpointErrorKind::NotFound
        );
        assert_eq!(
            classify(&status_err(StatusCode::PermissionDenied)),
            EndpointErrorKind::PermissionDenied
        );
        // a generic failure stays unclassified; mkdir-over-existing
        // raises it and the engine treats it as best-effort
        assert_eq!(
            classify(&status_err(StatusCode::Failure)),
            EndpointErrorKind::Other
        );
    }

    #[test]
    fn test_entry_stats_kinds() {
        let dir = FileAttributes {
            permissions: Some(0o040_755),
            ..Default::default()
        };
        assert_eq!(entry_stats(&dir).kind, EntryKind::Directory);

        let link = FileAttributes {
            permissions: Some(0o120_777),
            ..Default::default()
        };
        assert_eq!(entry_stats(&link).kind, EntryKind::Symlink);

        let file = FileAttributes {
            size: Some(12),
            permissions: Some(0o100_644),
            mtime: Some(1_700_000_000),
            ..Default::default()
        };
        let stats = entry_stats(&file);
        assert_eq!(stats.kind, EntryKind::File);
        assert_eq!(stats.size, 12);
        assert_eq!(stats.mtime, 1_700_000_000);
        assert_eq!(stats.mode, Some(0o644));
    }

    #[test]
    fn test_host_port_split() {
        let mut config = SftpConfig::new("files.example.net", "deploy");
        assert_eq!(
            config.host_port().expect("default"),
            ("files.example.net".to_string(), 22)
        );

        config.host = "files.example.net:2222".to_string();
        assert_eq!(
            config.host_port().expect("explicit"),
            ("files.example.net".to_string(), 2222)
        );

        config.host = "files.example.net:nope".to_string();
        assert!(config.host_port().is_err());
    }
}
