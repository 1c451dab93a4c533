/*!
 * Configuration types for backup and restore
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{BackupError, Result};

/// Main configuration, loadable from a TOML file and overridden by CLI flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Compression used for backups when none is given on the command line
    #[serde(default = "default_compression")]
    pub compression: Compression,

    /// Gzip level (0-9)
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,

    /// Zstd level (1-22)
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,

    /// Show progress bar
    #[serde(default)]
    pub show_progress: bool,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Serve volumes from subdirectories of this path instead of Docker
    #[serde(default)]
    pub volume_root: Option<PathBuf>,

    /// Directory for temporary staging files (None = system temp dir)
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Docker CLI settings
    #[serde(default)]
    pub docker: DockerConfig,

    /// Object store settings
    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            compression: default_compression(),
            gzip_level: default_gzip_level(),
            zstd_level: default_zstd_level(),
            show_progress: false,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            volume_root: None,
            staging_dir: None,
            docker: DockerConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

/// How the Docker CLI is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker executable
    #[serde(default = "default_docker_binary")]
    pub binary: String,

    /// Image used for helper containers (needs `sh`, `rm`, `du`, `ls`)
    #[serde(default = "default_helper_image")]
    pub helper_image: String,

    /// Where the volume is mounted inside helper containers
    #[serde(default = "default_mount_point")]
    pub mount_point: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: default_docker_binary(),
            helper_image: default_helper_image(),
            mount_point: default_mount_point(),
        }
    }
}

/// S3 / S3-compatible object store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// AWS region; falls back to the SDK chain, then `us-east-1`
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL (MinIO, LocalStack, ...)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Path-style addressing (required by most S3-compatible services)
    #[serde(default = "default_true")]
    pub force_path_style: bool,

    /// Multipart part size in MiB; files above this use multipart upload
    #[serde(default = "default_part_size_mib")]
    pub part_size_mib: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            force_path_style: true,
            part_size_mib: default_part_size_mib(),
        }
    }
}

impl RemoteConfig {
    /// Part size in bytes, clamped to the S3 minimum of 5 MiB
    pub fn part_size_bytes(&self) -> u64 {
        self.part_size_mib.max(5) * 1024 * 1024
    }
}

/// Compression applied to the tar stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Compression {
    /// Plain tar
    #[serde(rename = "none")]
    None,

    /// Gzip (`.tar.gz`)
    #[default]
    #[serde(rename = "gz")]
    Gzip,

    /// Zstandard (`.tar.zst`)
    #[serde(rename = "zstd")]
    Zstd,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

impl Compression {
    /// Infer compression from an archive name's suffix.
    ///
    /// Returns `None` when the suffix is not one of the recognised archive
    /// extensions.
    pub fn from_archive_name(name: &str) -> Option<Compression> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zst") {
            Some(Compression::Zstd)
        } else if lower.ends_with(".gz") || lower.ends_with(".tgz") {
            Some(Compression::Gzip)
        } else if lower.ends_with(".tar") {
            Some(Compression::None)
        } else {
            None
        }
    }

    /// Recognise a compressed stream by its magic number
    pub fn sniff(header: &[u8]) -> Compression {
        if header.starts_with(&ZSTD_MAGIC) {
            Compression::Zstd
        } else if header.starts_with(&GZIP_MAGIC) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }

    /// Archive extension including the tar part
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => ".tar",
            Compression::Gzip => ".tar.gz",
            Compression::Zstd => ".tar.zst",
        }
    }

    /// Selector name as accepted on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gz",
            Compression::Zstd => "zstd",
        }
    }
}

impl FromStr for Compression {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(BackupError::Config(format!(
                "unsupported compression type: {} (expected none, gz or zstd)",
                other
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_compression() -> Compression {
    Compression::Gzip
}

fn default_gzip_level() -> u32 {
    6
}

fn default_zstd_level() -> i32 {
    3
}

fn default_docker_binary() -> String {
    "docker".to_string()
}

fn default_helper_image() -> String {
    "alpine".to_string()
}

fn default_mount_point() -> String {
    "/data".to_string()
}

fn default_part_size_mib() -> u64 {
    16
}

impl BackupConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&contents)
            .map_err(|e| BackupError::Config(format!("cannot parse {}: {}", path.display(), e)))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| BackupError::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
