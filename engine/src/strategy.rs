//! Transfer strategy selection and execution.
//!
//! The strategy is chosen once per job from the capability intersection
//! of the two endpoints and reused for every file in that job. Each
//! variant wraps one primitive so the per-file executor always calls the
//! same `transfer` operation.

use tokio::io::AsyncWriteExt;

use crate::endpoint::Endpoint;
use crate::error::{classify_io, SyncError};

/// How file contents move between the two endpoints of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStrategy {
    /// Source read stream piped into a destination write stream
    /// (both endpoints accelerated, e.g. remote to remote).
    Pipe,
    /// Destination-side same-namespace copy (both endpoints local).
    NativeCopy,
    /// The source endpoint pulls into the destination's local path
    /// (remote source, local destination).
    Download,
    /// Destination-side accelerated put (local source, remote
    /// destination).
    Put,
}

impl TransferStrategy {
    /// Deterministic capability-based selection. Fails with
    /// `UnsupportedStrategy` before any I/O when no variant fits.
    pub fn select(source: &dyn Endpoint, dest: &dyn Endpoint) -> Result<Self, SyncError> {
        let src = source.capabilities();
        let dst = dest.capabilities();

        if src.accelerated && dst.accelerated {
            Ok(Self::Pipe)
        } else if src.native_copy && dst.native_copy {
            Ok(Self::NativeCopy)
        } else if src.accelerated && dst.set_times {
            Ok(Self::Download)
        } else if dst.accelerated {
            Ok(Self::Put)
        } else {
            Err(SyncError::UnsupportedStrategy)
        }
    }

    /// Move one file's contents from `src` on `source` to `dst` on
    /// `dest`. `mode` is applied to the created entry when given;
    /// timestamps are the caller's responsibility.
    pub async fn transfer(
        self,
        source: &dyn Endpoint,
        dest: &dyn Endpoint,
        src: &str,
        dst: &str,
        mode: Option<u32>,
    ) -> Result<(), SyncError> {
        match self {
            Self::Pipe => {
                let mut reader = source.open_read(src).await?;
                let mut writer = dest.open_write(dst, mode).await?;
                tokio::io::copy(&mut reader, &mut writer)
                    .await
                    .map_err(|e| SyncError::endpoint(dst, classify_io(&e), e.to_string()))?;
                writer
                    .shutdown()
                    .await
                    .map_err(|e| SyncError::endpoint(dst, classify_io(&e), e.to_string()))
            }
            Self::NativeCopy => {
                dest.copy_native(src, dst).await?;
                if let Some(mode) = mode {
                    dest.set_mode(dst, mode).await?;
                }
                Ok(())
            }
            Self::Download => source.accel_get(src, dst, mode).await,
            Self::Put => dest.accel_put(src, dst, mode).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Capabilities, ReadStream, WriteStream};
    use crate::model::EntryStats;
    use async_trait::async_trait;

    struct FakeEndpoint {
        caps: Capabilities,
    }

    impl FakeEndpoint {
        fn with(caps: Capabilities) -> Self {
            Self { caps }
        }
    }

    #[async_trait]
    impl Endpoint for FakeEndpoint {
        fn name(&self) -> &str {
            "fake"
        }

        fn capabilities(&self) -> Capabilities {
            self.caps
        }

        async fn realpath(&self, path: &str) -> Result<String, SyncError> {
            Ok(path.to_string())
        }

        async fn stat(&self, path: &str) -> Result<EntryStats, SyncError> {
            Err(SyncError::unsupported(path, "stat"))
        }

        async fn lstat(&self, path: &str) -> Result<EntryStats, SyncError> {
            Err(SyncError::unsupported(path, "lstat"))
        }

        async fn read_dir(&self, _path: &str) -> Result<Vec<String>, SyncError> {
            Ok(Vec::new())
        }

        async fn mkdir(&self, _path: &str, _mode: Option<u32>) -> Result<(), SyncError> {
            Ok(())
        }

        async fn rmdir(&self, _path: &str) -> Result<(), SyncError> {
            Ok(())
        }

        async fn unlink(&self, _path: &str) -> Result<(), SyncError> {
            Ok(())
        }

        async fn open_read(&self, path: &str) -> Result<ReadStream, SyncError> {
            Err(SyncError::unsupported(path, "open_read"))
        }

        async fn open_write(&self, path: &str, _mode: Option<u32>) -> Result<WriteStream, SyncError> {
            Err(SyncError::unsupported(path, "open_write"))
        }

        async fn set_times(&self, _path: &str, _atime: i64, _mtime: i64) -> Result<(), SyncError> {
            Ok(())
        }

        async fn set_mode(&self, _path: &str, _mode: u32) -> Result<(), SyncError> {
            Ok(())
        }
    }

    const ACCELERATED: Capabilities = Capabilities {
        accelerated: true,
        native_copy: false,
        set_times: true,
    };

    const LOCAL: Capabilities = Capabilities {
        accelerated: false,
        native_copy: true,
        set_times: true,
    };

    const BARE: Capabilities = Capabilities {
        accelerated: false,
        native_copy: false,
        set_times: false,
    };

    #[test]
    fn test_both_accelerated_pipes() {
        let a = FakeEndpoint::with(ACCELERATED);
        let b = FakeEndpoint::with(ACCELERATED);
        assert_eq!(TransferStrategy::select(&a, &b).expect("pipe"), TransferStrategy::Pipe);
    }

    #[test]
    fn test_both_local_native_copy() {
        let a = FakeEndpoint::with(LOCAL);
        let b = FakeEndpoint::with(LOCAL);
        assert_eq!(
            TransferStrategy::select(&a, &b).expect("copy"),
            TransferStrategy::NativeCopy
        );
    }

    #[test]
    fn test_remote_source_local_dest_downloads() {
        let a = FakeEndpoint::with(ACCELERATED);
        let b = FakeEndpoint::with(LOCAL);
        assert_eq!(
            TransferStrategy::select(&a, &b).expect("download"),
            TransferStrategy::Download
        );
    }

    #[test]
    fn test_local_source_remote_dest_puts() {
        let a = FakeEndpoint::with(LOCAL);
        let b = FakeEndpoint::with(ACCELERATED);
        assert_eq!(TransferStrategy::select(&a, &b).expect("put"), TransferStrategy::Put);
    }

    #[test]
    fn test_no_capabilities_is_unsupported() {
        let a = FakeEndpoint::with(BARE);
        let b = FakeEndpoint::with(BARE);
        let err = TransferStrategy::select(&a, &b).expect_err("unsupported");
        assert!(matches!(err, SyncError::UnsupportedStrategy));
    }
}
