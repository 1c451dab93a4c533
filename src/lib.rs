/*!
 * docker-volume-backup - stream Docker volumes to and from tar archives
 *
 * Backups re-frame a volume's tar export into a local archive, optionally
 * compressed with gzip or zstd and optionally staged to S3. Restores run the
 * same pipeline in reverse after deciding whether the target volume may be
 * written.
 */

pub mod admission;
pub mod archive;
pub mod compression;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipe;
pub mod progress;
pub mod remote;
pub mod transfer;
pub mod volume;

// Re-export commonly used types
pub use admission::Admission;
pub use archive::{ArchiveEntry, EntryKind, TranscodeStats};
pub use config::{BackupConfig, Compression, LogLevel};
pub use error::{BackupError, ErrorCategory, Result};
pub use remote::{Location, RemotePath, RemoteStore};
pub use transfer::{Transfer, TransferOptions, TransferReport};
pub use volume::{DirectoryGateway, DirectoryVolumes, DockerCli, VolumeGateway, VolumeStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
