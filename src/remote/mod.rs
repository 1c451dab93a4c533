/*!
 * Object store addressing and the remote store contract
 */

#[cfg(feature = "s3")]
pub mod s3;

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::error::{BackupError, Result};

#[cfg(feature = "s3")]
pub use self::s3::S3Remote;

/// URI scheme prefix for object store paths
pub const SCHEME: &str = "s3://";

/// A validated `s3://bucket/key` path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath {
    bucket: String,
    key: String,
}

impl RemotePath {
    pub fn parse(path: &str) -> Result<RemotePath> {
        let invalid = |reason: &str| BackupError::InvalidRemotePath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let rest = path
            .strip_prefix(SCHEME)
            .ok_or_else(|| invalid("must start with s3://"))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| invalid("expected s3://bucket/key"))?;
        if bucket.is_empty() {
            return Err(invalid("bucket is empty"));
        }
        if key.is_empty() {
            return Err(invalid("key is empty"));
        }

        Ok(RemotePath {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl FromStr for RemotePath {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        RemotePath::parse(s)
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.bucket, self.key)
    }
}

/// Object store used to stage archives remotely
pub trait RemoteStore: Send + Sync {
    fn validate_path(&self, path: &str) -> Result<RemotePath> {
        RemotePath::parse(path)
    }

    /// Upload a local file; returns the number of bytes sent
    fn upload(&self, local: &Path, remote: &RemotePath) -> Result<u64>;

    /// Download into a local file (created or truncated); returns bytes received
    fn download(&self, remote: &RemotePath, local: &Path) -> Result<u64>;
}

/// Stand-in used when no object store is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemote;

impl RemoteStore for NoRemote {
    fn upload(&self, _local: &Path, remote: &RemotePath) -> Result<u64> {
        Err(unavailable(remote))
    }

    fn download(&self, remote: &RemotePath, _local: &Path) -> Result<u64> {
        Err(unavailable(remote))
    }
}

fn unavailable(remote: &RemotePath) -> BackupError {
    BackupError::Config(format!(
        "cannot reach {}: this build has no object store support",
        remote
    ))
}

/// Where an archive lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    Remote(RemotePath),
}

impl Location {
    /// Classify by the `s3://` prefix and validate accordingly
    pub fn parse(path: &str) -> Result<Location> {
        if path.starts_with(SCHEME) {
            RemotePath::parse(path).map(Location::Remote)
        } else {
            validate_local_path(path).map(Location::Local)
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Location::Remote(_))
    }

    /// Name used for suffix-based codec inference
    pub fn name(&self) -> String {
        match self {
            Location::Local(path) => path.to_string_lossy().into_owned(),
            Location::Remote(remote) => remote.key().to_string(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(path) => write!(f, "{}", path.display()),
            Location::Remote(remote) => write!(f, "{}", remote),
        }
    }
}

/// Reject empty paths and paths that climb out with `..`
pub fn validate_local_path(path: &str) -> Result<PathBuf> {
    let invalid = |reason: &str| BackupError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.trim().is_empty() {
        return Err(invalid("path is empty"));
    }
    let candidate = PathBuf::from(path);
    if candidate
        .components()
        .any(|component| component == Component::ParentDir)
    {
        return Err(invalid("path must not contain '..'"));
    }
    Ok(candidate)
}
