/*!
 * Error types for volume backup and restore
 */

use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BackupError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_PRECONDITION: i32 = 3;

#[derive(Debug, Error)]
pub enum BackupError {
    /// Volume name does not match the accepted grammar
    #[error("invalid volume name '{name}': {reason}")]
    InvalidVolumeName { name: String, reason: String },

    /// Local archive path rejected before any I/O
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// Remote object path rejected before any I/O
    #[error("invalid remote path '{path}': {reason}")]
    InvalidRemotePath { path: String, reason: String },

    /// Backup source volume is missing
    #[error("volume '{0}' does not exist")]
    VolumeNotFound(String),

    /// Restore target exists and overwrite was not requested
    #[error(
        "volume '{0}' already exists; use --overwrite to clear and restore, or delete the volume first"
    )]
    VolumeAlreadyExists(String),

    /// Clearing a volume left entries behind
    #[error("volume '{0}' still has content after clearing")]
    ClearIncomplete(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Tar framing failed while reading or writing entries
    #[error("archive error: {context}: {source}")]
    Archive {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Compression error
    #[error("compression error: {0}")]
    Compression(String),

    /// Decompression error (malformed input, bad trailer)
    #[error("decompression error: {0}")]
    Decompression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// External command exited unsuccessfully
    #[error("`{command}` failed ({status}){}", format_output(.output))]
    Subprocess {
        command: String,
        status: String,
        output: String,
    },

    /// Object store error
    #[error("remote store error: {0}")]
    Remote(String),

    /// Resource teardown failed
    #[error("cleanup failed: {0}")]
    Cleanup(String),
}

fn format_output(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl BackupError {
    /// Wrap an I/O error raised while framing the archive
    pub fn archive(context: impl Into<String>, source: io::Error) -> Self {
        BackupError::Archive {
            context: context.into(),
            source,
        }
    }

    /// Attach a secondary diagnostic to a stream error, keeping its variant.
    ///
    /// Errors without a free-form context are returned unchanged.
    pub fn annotate(self, note: &str) -> Self {
        match self {
            BackupError::Archive { context, source } => BackupError::Archive {
                context: format!("{} ({})", context, note),
                source,
            },
            BackupError::Io(e) => {
                BackupError::Io(io::Error::new(e.kind(), format!("{} ({})", e, note)))
            }
            BackupError::Compression(msg) => BackupError::Compression(format!("{} ({})", msg, note)),
            BackupError::Decompression(msg) => {
                BackupError::Decompression(format!("{} ({})", msg, note))
            }
            other => other,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Validation | ErrorCategory::Configuration => EXIT_USAGE,
            ErrorCategory::Precondition => EXIT_PRECONDITION,
            _ => EXIT_FAILURE,
        }
    }

    /// Get error category for logging and reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            BackupError::InvalidVolumeName { .. }
            | BackupError::InvalidPath { .. }
            | BackupError::InvalidRemotePath { .. } => ErrorCategory::Validation,
            BackupError::VolumeNotFound(_) | BackupError::VolumeAlreadyExists(_) => {
                ErrorCategory::Precondition
            }
            BackupError::ClearIncomplete(_)
            | BackupError::Archive { .. }
            | BackupError::Compression(_)
            | BackupError::Decompression(_)
            | BackupError::Io(_) => ErrorCategory::Stream,
            BackupError::Subprocess { .. } => ErrorCategory::Subprocess,
            BackupError::Config(_) => ErrorCategory::Configuration,
            BackupError::Remote(_) => ErrorCategory::Remote,
            BackupError::Cleanup(_) => ErrorCategory::Cleanup,
        }
    }

    /// Check whether the operation was refused before touching any data
    pub fn is_precondition(&self) -> bool {
        self.category() == ErrorCategory::Precondition
    }
}

/// Error category for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad volume name, path, or remote path
    Validation,
    /// Volume missing or already present
    Precondition,
    /// Read/write/codec failure mid-transfer
    Stream,
    /// Bridging or helper process failed
    Subprocess,
    /// Context teardown or temp file removal failed
    Cleanup,
    /// Configuration errors
    Configuration,
    /// Object store errors
    Remote,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Precondition => write!(f, "precondition"),
            ErrorCategory::Stream => write!(f, "stream"),
            ErrorCategory::Subprocess => write!(f, "subprocess"),
            ErrorCategory::Cleanup => write!(f, "cleanup"),
            ErrorCategory::Configuration => write!(f, "configuration"),
            ErrorCategory::Remote => write!(f, "remote"),
        }
    }
}

/// Combine a primary outcome with a secondary one.
///
/// The primary error always wins; the secondary is only surfaced when the
/// primary succeeded.
pub fn settle<T>(primary: Result<T>, secondary: Result<()>) -> Result<T> {
    match (primary, secondary) {
        (Err(e), Err(secondary)) => {
            tracing::debug!("suppressed secondary error: {}", secondary);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(v), Ok(())) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_constants() {
        assert_eq!(EXIT_SUCCESS, 0);
        assert_eq!(EXIT_FAILURE, 1);
        assert_eq!(EXIT_USAGE, 2);
        assert_eq!(EXIT_PRECONDITION, 3);
    }

    #[test]
    fn test_category_all_variants() {
        assert_eq!(
            BackupError::InvalidVolumeName {
                name: "x".into(),
                reason: "r".into()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            BackupError::InvalidPath {
                path: "x".into(),
                reason: "r".into()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            BackupError::InvalidRemotePath {
                path: "x".into(),
                reason: "r".into()
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(
            BackupError::VolumeNotFound("v".into()).category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            BackupError::VolumeAlreadyExists("v".into()).category(),
            ErrorCategory::Precondition
        );
        assert_eq!(
            BackupError::ClearIncomplete("v".into()).category(),
            ErrorCategory::Stream
        );
        assert_eq!(
            BackupError::archive("header", io::Error::other("x")).category(),
            ErrorCategory::Stream
        );
        assert_eq!(
            BackupError::Compression("x".into()).category(),
            ErrorCategory::Stream
        );
        assert_eq!(
            BackupError::Decompression("x".into()).category(),
            ErrorCategory::Stream
        );
        assert_eq!(
            BackupError::Io(io::Error::other("x")).category(),
            ErrorCategory::Stream
        );
        assert_eq!(
            BackupError::Subprocess {
                command: "docker cp".into(),
                status: "exit status: 1".into(),
                output: String::new()
            }
            .category(),
            ErrorCategory::Subprocess
        );
        assert_eq!(
            BackupError::Config("x".into()).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            BackupError::Remote("x".into()).category(),
            ErrorCategory::Remote
        );
        assert_eq!(
            BackupError::Cleanup("x".into()).category(),
            ErrorCategory::Cleanup
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            BackupError::InvalidVolumeName {
                name: "-bad".into(),
                reason: "r".into()
            }
            .exit_code(),
            EXIT_USAGE
        );
        assert_eq!(BackupError::Config("bad".into()).exit_code(), EXIT_USAGE);
        assert_eq!(
            BackupError::VolumeAlreadyExists("v".into()).exit_code(),
            EXIT_PRECONDITION
        );
        assert_eq!(
            BackupError::Io(io::Error::other("disk")).exit_code(),
            EXIT_FAILURE
        );
        assert_eq!(BackupError::Remote("s3".into()).exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_already_exists_message() {
        let err = BackupError::VolumeAlreadyExists("v2".into());
        let display = err.to_string();
        assert!(display.contains("v2"));
        assert!(display.contains("already exists"));
        assert!(err.is_precondition());
    }

    #[test]
    fn test_annotate_keeps_variant() {
        let err = BackupError::archive(
            "copy a.txt",
            io::Error::new(io::ErrorKind::BrokenPipe, "closed"),
        )
        .annotate("`docker cp` failed: no space left");
        match &err {
            BackupError::Archive { context, source } => {
                assert!(context.starts_with("copy a.txt"));
                assert!(context.contains("no space left"));
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = BackupError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            .annotate("helper exited");
        match err {
            BackupError::Io(e) => {
                assert_eq!(e.kind(), io::ErrorKind::BrokenPipe);
                assert!(e.to_string().contains("helper exited"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = BackupError::VolumeNotFound("v".into()).annotate("ignored");
        assert_eq!(err.to_string(), "volume 'v' does not exist");
    }

    #[test]
    fn test_subprocess_display_includes_output() {
        let err = BackupError::Subprocess {
            command: "docker cp - abc:/data/".into(),
            status: "exit status: 1".into(),
            output: "  no such container\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "`docker cp - abc:/data/` failed (exit status: 1): no such container"
        );

        let quiet = BackupError::Subprocess {
            command: "docker rm abc".into(),
            status: "exit status: 1".into(),
            output: String::new(),
        };
        assert_eq!(quiet.to_string(), "`docker rm abc` failed (exit status: 1)");
    }

    #[test]
    fn test_archive_error_source() {
        use std::error::Error;

        let err = BackupError::archive("read header", io::Error::other("truncated"));
        assert!(err.to_string().contains("read header"));
        assert!(err.source().unwrap().to_string().contains("truncated"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: BackupError = io_err.into();
        match &err {
            BackupError::Io(inner) => assert_eq!(inner.kind(), io::ErrorKind::PermissionDenied),
            other => panic!("Expected BackupError::Io, got {:?}", other),
        }
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_settle_primary_wins() {
        let primary: Result<()> = Err(BackupError::Decompression("bad frame".into()));
        let secondary = Err(BackupError::Subprocess {
            command: "docker cp".into(),
            status: "exit status: 1".into(),
            output: String::new(),
        });
        let err = settle(primary, secondary).unwrap_err();
        assert!(matches!(err, BackupError::Decompression(_)));
    }

    #[test]
    fn test_settle_secondary_when_primary_ok() {
        let err = settle(Ok(5), Err(BackupError::Remote("x".into()))).unwrap_err();
        assert!(matches!(err, BackupError::Remote(_)));
        assert_eq!(settle(Ok(5), Ok(())).unwrap(), 5);
    }

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::Validation.to_string(), "validation");
        assert_eq!(ErrorCategory::Precondition.to_string(), "precondition");
        assert_eq!(ErrorCategory::Stream.to_string(), "stream");
        assert_eq!(ErrorCategory::Subprocess.to_string(), "subprocess");
        assert_eq!(ErrorCategory::Cleanup.to_string(), "cleanup");
        assert_eq!(ErrorCategory::Configuration.to_string(), "configuration");
        assert_eq!(ErrorCategory::Remote.to_string(), "remote");
    }
}
