//! The endpoint capability surface and the local filesystem endpoint.
//!
//! An `Endpoint` is one side of a sync job. The engine only ever talks
//! to this trait; it never constructs or closes endpoints itself. Paths
//! are passed as strings in the endpoint's own convention so that mixed
//! POSIX/Windows pairs keep their native separators.

use std::path::PathBuf;
use std::pin::Pin;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::SyncError;
use crate::model::{EntryKind, EntryStats};

/// Optimized operations an endpoint exposes, inspected once per job to
/// select the transfer strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    /// Fast put/get between the endpoint's namespace and a local path.
    pub accelerated: bool,
    /// Same-namespace copy without streaming through the engine.
    pub native_copy: bool,
    /// The endpoint can set atime/mtime on its entries.
    pub set_times: bool,
}

pub type ReadStream = Pin<Box<dyn AsyncRead + Send>>;
pub type WriteStream = Pin<Box<dyn AsyncWrite + Send>>;

/// Filesystem-like capability set for one side of a job.
///
/// `accel_get`, `accel_put` and `copy_native` have unsupported defaults;
/// endpoints advertise the ones they implement through
/// [`Capabilities`].
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Canonicalize a path (resolving symlinks).
    async fn realpath(&self, path: &str) -> Result<String, SyncError>;

    /// Stat following symlinks.
    async fn stat(&self, path: &str) -> Result<EntryStats, SyncError>;

    /// Stat without following symlinks.
    async fn lstat(&self, path: &str) -> Result<EntryStats, SyncError>;

    /// List a directory's child names (no `.`/`..`).
    async fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError>;

    async fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<(), SyncError>;

    async fn rmdir(&self, path: &str) -> Result<(), SyncError>;

    async fn unlink(&self, path: &str) -> Result<(), SyncError>;

    async fn open_read(&self, path: &str) -> Result<ReadStream, SyncError>;

    async fn open_write(&self, path: &str, mode: Option<u32>) -> Result<WriteStream, SyncError>;

    /// Same-namespace copy (both paths belong to this endpoint).
    async fn copy_native(&self, src: &str, dst: &str) -> Result<(), SyncError> {
        let _ = dst;
        Err(SyncError::unsupported(src, "native copy"))
    }

    /// Accelerated download: read `src` from this endpoint's namespace
    /// and write it to the OS-local path `local_dst`.
    async fn accel_get(&self, src: &str, local_dst: &str, mode: Option<u32>) -> Result<(), SyncError> {
        let _ = (local_dst, mode);
        Err(SyncError::unsupported(src, "accelerated get"))
    }

    /// Accelerated upload: read the OS-local path `local_src` and write
    /// it to `dst` in this endpoint's namespace.
    async fn accel_put(&self, local_src: &str, dst: &str, mode: Option<u32>) -> Result<(), SyncError> {
        let _ = (dst, mode);
        Err(SyncError::unsupported(local_src, "accelerated put"))
    }

    /// Set access and modification times (whole epoch seconds).
    async fn set_times(&self, path: &str, atime: i64, mtime: i64) -> Result<(), SyncError>;

    /// Set permission bits. May be a no-op where the platform has none.
    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), SyncError>;
}

/// Result of a symlink-aware stat: resolved stats drive type decisions,
/// the original link stats drive metadata preservation.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub stats: EntryStats,
    pub resolved_path: String,
    pub link_stats: EntryStats,
}

/// Stat `path`, following exactly one level of symbolic link. Not-found
/// at either stage propagates unchanged.
pub async fn rstat(endpoint: &dyn Endpoint, path: &str) -> Result<Resolved, SyncError> {
    let link_stats = endpoint.lstat(path).await?;
    if !link_stats.is_symlink() {
        return Ok(Resolved {
            stats: link_stats.clone(),
            resolved_path: path.to_string(),
            link_stats,
        });
    }

    let resolved_path = endpoint.realpath(path).await?;
    let stats = endpoint.lstat(&resolved_path).await?;
    Ok(Resolved {
        stats,
        resolved_path,
        link_stats,
    })
}

/// The OS-local filesystem as an endpoint, backed by `tokio::fs`.
#[derive(Debug, Default)]
pub struct LocalEndpoint;

impl LocalEndpoint {
    pub fn new() -> Self {
        Self
    }
}

fn entry_stats(meta: &std::fs::Metadata) -> EntryStats {
    let kind = if meta.file_type().is_symlink() {
        EntryKind::Symlink
    } else if meta.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };

    let seconds = |time: std::io::Result<std::time::SystemTime>| -> i64 {
        match time {
            Ok(t) => match t.duration_since(UNIX_EPOCH) {
                Ok(d) => d.as_secs() as i64,
                Err(e) => -(e.duration().as_secs() as i64),
            },
            Err(_) => 0,
        }
    };

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        Some(meta.permissions().mode() & 0o7777)
    };
    #[cfg(not(unix))]
    let mode = None;

    EntryStats {
        kind,
        size: meta.len(),
        mtime: seconds(meta.modified()),
        atime: seconds(meta.accessed()),
        mode,
    }
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn name(&self) -> &str {
        "local"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            accelerated: false,
            native_copy: true,
            set_times: true,
        }
    }

    async fn realpath(&self, path: &str) -> Result<String, SyncError> {
        let resolved = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| SyncError::io(path, &e))?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    async fn stat(&self, path: &str) -> Result<EntryStats, SyncError> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::io(path, &e))?;
        Ok(entry_stats(&meta))
    }

    async fn lstat(&self, path: &str) -> Result<EntryStats, SyncError> {
        let meta = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| SyncError::io(path, &e))?;
        Ok(entry_stats(&meta))
    }

    async fn read_dir(&self, path: &str) -> Result<Vec<String>, SyncError> {
        let mut reader = tokio::fs::read_dir(path)
            .await
            .map_err(|e| SyncError::io(path, &e))?;
        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| SyncError::io(path, &e))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn mkdir(&self, path: &str, mode: Option<u32>) -> Result<(), SyncError> {
        let mut builder = tokio::fs::DirBuilder::new();
        #[cfg(unix)]
        if let Some(mode) = mode {
            builder.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        builder.create(path).await.map_err(|e| SyncError::io(path, &e))
    }

    async fn rmdir(&self, path: &str) -> Result<(), SyncError> {
        tokio::fs::remove_dir(path)
            .await
            .map_err(|e| SyncError::io(path, &e))
    }

    async fn unlink(&self, path: &str) -> Result<(), SyncError> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| SyncError::io(path, &e))
    }

    async fn open_read(&self, path: &str) -> Result<ReadStream, SyncError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| SyncError::io(path, &e))?;
        Ok(Box::pin(file))
    }

    async fn open_write(&self, path: &str, mode: Option<u32>) -> Result<WriteStream, SyncError> {
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        if let Some(mode) = mode {
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let file = options.open(path).await.map_err(|e| SyncError::io(path, &e))?;
        Ok(Box::pin(file))
    }

    async fn copy_native(&self, src: &str, dst: &str) -> Result<(), SyncError> {
        tokio::fs::copy(src, dst)
            .await
            .map_err(|e| SyncError::io(src, &e))?;
        Ok(())
    }

    async fn set_times(&self, path: &str, atime: i64, mtime: i64) -> Result<(), SyncError> {
        let target = PathBuf::from(path);
        let result = tokio::task::spawn_blocking(move || {
            filetime::set_file_times(
                &target,
                filetime::FileTime::from_unix_time(atime, 0),
                filetime::FileTime::from_unix_time(mtime, 0),
            )
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SyncError::io(path, &e)),
            Err(join) => Err(SyncError::endpoint(
                path,
                crate::error::EndpointErrorKind::Other,
                join.to_string(),
            )),
        }
    }

    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), SyncError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| SyncError::io(path, &e))
        }
        #[cfg(not(unix))]
        {
            let _ = (path, mode);
            Ok(())
        }
    }
}
