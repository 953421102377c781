//! Error types for the synchronization engine.
//!
//! `SyncError` covers both job-level failures (type mismatches, missing
//! strategy) and endpoint I/O failures. Endpoint implementations classify
//! their native errors into `EndpointErrorKind` so that retry and
//! not-found handling work the same for local io errors and SFTP status
//! codes.

use std::error::Error;
use std::fmt::{self, Display};
use std::io;

/// Classification of an endpoint-level failure.
///
/// Local endpoints derive this from `io::ErrorKind`; the SFTP endpoint
/// derives it from SFTP status codes. `Busy`, `NotEmpty` and
/// `PermissionDenied` are the kinds the retry combinator may treat as
/// transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointErrorKind {
    /// The path does not exist.
    NotFound,
    /// Permission denied (also raised for transient permission races).
    PermissionDenied,
    /// The resource is busy.
    Busy,
    /// Directory is not empty.
    NotEmpty,
    /// The endpoint does not implement the requested primitive.
    Unsupported,
    /// Anything else.
    Other,
}

/// Errors raised by the synchronization engine.
#[derive(Debug)]
pub enum SyncError {
    /// An endpoint operation failed.
    Endpoint {
        path: String,
        kind: EndpointErrorKind,
        message: String,
    },

    /// Source and destination entry types conflict (file vs directory).
    TypeMismatch {
        source: String,
        dest: String,
        source_is_dir: bool,
    },

    /// A source path segment contains the destination's separator.
    SeparatorClash { path: String, separator: char },

    /// No viable transfer strategy between the two endpoints.
    UnsupportedStrategy,

    /// A directory source was given without `recursive`.
    RecursionRequired { path: String },

    /// A filter pattern failed to compile.
    Pattern { pattern: String, message: String },
}

impl Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint { path, kind, message } => match kind {
                EndpointErrorKind::NotFound => write!(f, "no such file or directory: {path}"),
                _ => write!(f, "{message}: {path}"),
            },
            Self::TypeMismatch { source, dest, source_is_dir } => {
                if *source_is_dir {
                    write!(f, "source '{source}' is a directory and destination '{dest}' is a file")
                } else {
                    write!(f, "source '{source}' is a file and destination '{dest}' is a directory")
                }
            }
            Self::SeparatorClash { path, separator } => {
                write!(
                    f,
                    "'{path}' cannot be transferred because '{separator}' is not a valid path character on the destination"
                )
            }
            Self::UnsupportedStrategy => {
                write!(f, "no supported transfer strategy between the two endpoints")
            }
            Self::RecursionRequired { path } => {
                write!(
                    f,
                    "source '{path}' is a directory; pass recursive to transfer a directory"
                )
            }
            Self::Pattern { pattern, message } => {
                write!(f, "invalid filter pattern '{pattern}': {message}")
            }
        }
    }
}

impl Error for SyncError {}

impl SyncError {
    /// Build an endpoint error from a raw `io::Error`.
    pub fn io(path: impl Into<String>, err: &io::Error) -> Self {
        Self::Endpoint {
            path: path.into(),
            kind: classify_io(err),
            message: err.to_string(),
        }
    }

    /// Build an endpoint error with an explicit classification.
    pub fn endpoint(path: impl Into<String>, kind: EndpointErrorKind, message: impl Into<String>) -> Self {
        Self::Endpoint {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an `Unsupported` endpoint error.
    pub fn unsupported(path: impl Into<String>, what: &str) -> Self {
        Self::endpoint(path, EndpointErrorKind::Unsupported, format!("operation not supported: {what}"))
    }

    /// The endpoint classification, if this is an endpoint error.
    pub fn endpoint_kind(&self) -> Option<EndpointErrorKind> {
        match self {
            Self::Endpoint { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True if the error means "the path does not exist".
    pub fn is_not_found(&self) -> bool {
        self.endpoint_kind() == Some(EndpointErrorKind::NotFound)
    }
}

/// Map `io::ErrorKind` onto the endpoint classification.
pub fn classify_io(err: &io::Error) -> EndpointErrorKind {
    match err.kind() {
        io::ErrorKind::NotFound => EndpointErrorKind::NotFound,
        io::ErrorKind::PermissionDenied => EndpointErrorKind::PermissionDenied,
        io::ErrorKind::ResourceBusy => EndpointErrorKind::Busy,
        io::ErrorKind::DirectoryNotEmpty => EndpointErrorKind::NotEmpty,
        io::ErrorKind::Unsupported => EndpointErrorKind::Unsupported,
        _ => EndpointErrorKind::Other,
    }
}

/// Transient-error predicate for delete operations: busy, not-empty and
/// permission races resolve themselves on retry often enough to be worth
/// a second attempt.
pub fn is_delete_transient(err: &SyncError) -> bool {
    matches!(
        err.endpoint_kind(),
        Some(EndpointErrorKind::Busy | EndpointErrorKind::NotEmpty | EndpointErrorKind::PermissionDenied)
    )
}

/// Transient-error predicate for `mkdir`: busy and permission races only.
pub fn is_mkdir_transient(err: &SyncError) -> bool {
    matches!(
        err.endpoint_kind(),
        Some(EndpointErrorKind::Busy | EndpointErrorKind::PermissionDenied)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_not_found() {
        let err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert_eq!(classify_io(&err), EndpointErrorKind::NotFound);
        assert!(SyncError::io("/tmp/x", &err).is_not_found());
    }

    #[test]
    fn test_delete_transient_predicate() {
        let busy = SyncError::endpoint("d", EndpointErrorKind::Busy, "busy");
        let not_empty = SyncError::endpoint("d", EndpointErrorKind::NotEmpty, "not empty");
        let missing = SyncError::endpoint("d", EndpointErrorKind::NotFound, "gone");
        assert!(is_delete_transient(&busy));
        assert!(is_delete_transient(&not_empty));
        assert!(!is_delete_transient(&missing));
    }

    #[test]
    fn test_mkdir_transient_excludes_not_empty() {
        let not_empty = SyncError::endpoint("d", EndpointErrorKind::NotEmpty, "not empty");
        assert!(!is_mkdir_transient(&not_empty));
        let busy = SyncError::endpoint("d", EndpointErrorKind::Busy, "busy");
        assert!(is_mkdir_transient(&busy));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = SyncError::TypeMismatch {
            source: "/a".to_string(),
            dest: "/b".to_string(),
            source_is_dir: true,
        };
        let msg = err.to_string();
        assert!(msg.contains("'/a' is a directory"));
        assert!(msg.contains("'/b' is a file"));
    }
}
