/*!
 * Backup and restore orchestration
 *
 * Backup: volume export -> transcoder -> compressor -> progress -> file,
 * then an optional upload of that file. Restore runs the chain in reverse,
 * after an optional download and the admission decision. Remote transfers
 * stage through a uniquely named temp file that is removed on every path.
 */

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::admission::{admit, Admission};
use crate::archive::{read_entries, transcode, ArchiveEntry, TranscodeStats};
use crate::compression::{compressor_with_level, decompressor_for};
use crate::config::{BackupConfig, Compression};
use crate::error::{BackupError, Result};
use crate::progress::{ProgressReader, ProgressWriter, TransferProgress};
use crate::remote::{validate_local_path, Location, RemotePath, RemoteStore, SCHEME};
use crate::volume::{VolumeGateway, VolumeStore};

/// Knobs that shape a transfer but not its semantics
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub show_progress: bool,
    pub gzip_level: u32,
    pub zstd_level: i32,
    /// Where staging files go (None = system temp dir)
    pub staging_dir: Option<PathBuf>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        TransferOptions::from(&BackupConfig::default())
    }
}

impl From<&BackupConfig> for TransferOptions {
    fn from(config: &BackupConfig) -> Self {
        Self {
            show_progress: config.show_progress,
            gzip_level: config.gzip_level,
            zstd_level: config.zstd_level,
            staging_dir: config.staging_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Backup,
    Restore,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Backup => write!(f, "backup"),
            Operation::Restore => write!(f, "restore"),
        }
    }
}

/// Outcome of a completed backup or restore
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub operation: Operation,
    pub volume: String,
    pub location: String,
    pub compression: Compression,
    /// Set for restores
    pub admission: Option<Admission>,
    pub stats: TranscodeStats,
    /// Bytes written to or read from the archive file
    pub archive_bytes: u64,
    pub elapsed: Duration,
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.operation {
            Operation::Backup => "to",
            Operation::Restore => "from",
        };
        write!(
            f,
            "{} of {} {} {}: {} entries, {} files, {} content bytes, {} archive bytes ({}) in {:.2?}",
            self.operation,
            self.volume,
            direction,
            self.location,
            self.stats.entries,
            self.stats.files,
            self.stats.bytes,
            self.archive_bytes,
            self.compression,
            self.elapsed
        )
    }
}

/// Entry point for backup, restore and listing
pub struct Transfer<'a> {
    store: &'a dyn VolumeStore,
    gateway: &'a dyn VolumeGateway,
    remote: &'a dyn RemoteStore,
    options: TransferOptions,
}

impl<'a> Transfer<'a> {
    pub fn new(
        store: &'a dyn VolumeStore,
        gateway: &'a dyn VolumeGateway,
        remote: &'a dyn RemoteStore,
    ) -> Self {
        Self {
            store,
            gateway,
            remote,
            options: TransferOptions::default(),
        }
    }

    pub fn with_options(mut self, options: TransferOptions) -> Self {
        self.options = options;
        self
    }

    /// Archive `volume` into `destination` (local path or `s3://bucket/key`)
    pub fn backup(
        &self,
        volume: &str,
        destination: &str,
        compression: Compression,
    ) -> Result<TransferReport> {
        self.store.validate_name(volume)?;
        let location = self.locate(destination)?;
        self.store.preflight()?;

        if !self.store.exists(volume)? {
            return Err(BackupError::VolumeNotFound(volume.to_string()));
        }

        let started = Instant::now();
        let (stats, archive_bytes) = match &location {
            Location::Local(path) => self.backup_to_file(volume, path, compression)?,
            Location::Remote(remote) => {
                if let Some(named) = Compression::from_archive_name(remote.key()) {
                    if named != compression {
                        warn!(
                            "{} suggests {} but the archive is written as {}",
                            remote, named, compression
                        );
                    }
                }
                let staging = self.staging_file(Operation::Backup, volume, compression.extension())?;
                let outcome = self
                    .backup_to_file(volume, &staging, compression)
                    .and_then(|written| {
                        self.remote.upload(&staging, remote)?;
                        Ok(written)
                    });
                discard(staging);
                outcome?
            }
        };

        let report = TransferReport {
            operation: Operation::Backup,
            volume: volume.to_string(),
            location: location.to_string(),
            compression,
            admission: None,
            stats,
            archive_bytes,
            elapsed: started.elapsed(),
        };
        info!("{}", report);
        Ok(report)
    }

    /// Restore the archive at `source` into `volume`.
    ///
    /// An existing volume is only written when `overwrite` is set, and is
    /// cleared first.
    pub fn restore(&self, source: &str, volume: &str, overwrite: bool) -> Result<TransferReport> {
        self.store.validate_name(volume)?;
        let location = self.locate(source)?;
        self.store.preflight()?;

        let started = Instant::now();
        let (admission, compression, stats, archive_bytes) = match &location {
            Location::Local(path) => {
                let file = open_archive(path)?;
                let compression = Compression::from_archive_name(&location.name())
                    .unwrap_or(Compression::None);
                let admission = admit(self.store, volume, overwrite)?;
                let (stats, read) = self.restore_from_file(file, compression, volume)?;
                (admission, compression, stats, read)
            }
            Location::Remote(remote) => {
                let extension = Compression::from_archive_name(remote.key())
                    .map(|c| c.extension())
                    .unwrap_or("");
                let staging = self.staging_file(Operation::Restore, volume, extension)?;
                let outcome = self.restore_staged(remote, &staging, volume, overwrite);
                discard(staging);
                outcome?
            }
        };

        let report = TransferReport {
            operation: Operation::Restore,
            volume: volume.to_string(),
            location: location.to_string(),
            compression,
            admission: Some(admission),
            stats,
            archive_bytes,
            elapsed: started.elapsed(),
        };
        info!("{}", report);
        Ok(report)
    }

    /// List the entries of an archive without touching any volume
    pub fn list(&self, source: &str) -> Result<Vec<ArchiveEntry>> {
        match self.locate(source)? {
            Location::Local(path) => {
                let file = open_archive(&path)?;
                let compression = Compression::from_archive_name(&path.to_string_lossy())
                    .unwrap_or(Compression::None);
                list_file(file, compression)
            }
            Location::Remote(remote) => {
                let staging = self.staging_file(Operation::Restore, "list", "")?;
                let outcome = self
                    .remote
                    .download(&remote, &staging)
                    .and_then(|_| {
                        let compression = staged_compression(&remote, &staging)?;
                        list_file(open_archive(&staging)?, compression)
                    });
                discard(staging);
                outcome
            }
        }
    }

    fn staging_file(&self, operation: Operation, volume: &str, suffix: &str) -> Result<TempPath> {
        let dir = self
            .options
            .staging_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let file = tempfile::Builder::new()
            .prefix(&format!("dvb-{}-{}-", operation, volume))
            .suffix(suffix)
            .tempfile_in(&dir)
            .map_err(|e| {
                BackupError::Io(std::io::Error::new(
                    e.kind(),
                    format!("cannot create staging file in {}: {}", dir.display(), e),
                ))
            })?;
        let path = file.into_temp_path();
        debug!("Staging through {}", path.display());
        Ok(path)
    }

    fn locate(&self, path: &str) -> Result<Location> {
        if path.starts_with(SCHEME) {
            self.remote.validate_path(path).map(Location::Remote)
        } else {
            validate_local_path(path).map(Location::Local)
        }
    }

    fn level(&self, compression: Compression) -> i32 {
        match compression {
            Compression::None => 0,
            Compression::Gzip => self.options.gzip_level.min(9) as i32,
            Compression::Zstd => self.options.zstd_level,
        }
    }

    fn progress(&self, operation: Operation, volume: &str, total: Option<u64>) -> TransferProgress {
        TransferProgress::new(
            self.options.show_progress,
            &format!("{} {}", operation, volume),
            total,
        )
    }

    /// Returns transcoding stats and the number of archive bytes written
    fn backup_to_file(
        &self,
        volume: &str,
        path: &Path,
        compression: Compression,
    ) -> Result<(TranscodeStats, u64)> {
        let total = if self.options.show_progress {
            Some(self.store.estimate_size(volume))
        } else {
            None
        };
        let mut progress = self.progress(Operation::Backup, volume, total);

        let file = File::create(path)?;
        debug!("Writing {} archive to {}", compression, path.display());
        let sink = ProgressWriter::new(BufWriter::new(file), Some(progress.sink()));

        let written = self.export_into(volume, sink, compression).and_then(|(sink, stats)| {
            let file = sink
                .into_inner()
                .into_inner()
                .map_err(|e| BackupError::Io(e.into_error()))?;
            file.sync_all()?;
            Ok(stats)
        });

        match written {
            Ok(stats) => {
                progress.finish();
                Ok((stats, progress.bytes()))
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(path) {
                    warn!(
                        "Failed to remove partial archive {}: {}",
                        path.display(),
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    fn export_into<W: Write>(
        &self,
        volume: &str,
        sink: W,
        compression: Compression,
    ) -> Result<(W, TranscodeStats)> {
        let mut session = self.gateway.export(volume)?;
        let outcome = compressor_with_level(sink, compression, self.level(compression))
            .and_then(|compressor| transcode(session.reader(), compressor))
            .and_then(|(compressor, stats)| Ok((compressor.finish()?, stats)));
        session.finish(outcome)
    }

    fn restore_staged(
        &self,
        remote: &RemotePath,
        staging: &Path,
        volume: &str,
        overwrite: bool,
    ) -> Result<(Admission, Compression, TranscodeStats, u64)> {
        let received = self.remote.download(remote, staging)?;
        debug!("Staged {} bytes from {} at {}", received, remote, staging.display());

        let compression = staged_compression(remote, staging)?;
        let file = open_archive(staging)?;
        let admission = admit(self.store, volume, overwrite)?;
        let (stats, read) = self.restore_from_file(file, compression, volume)?;
        Ok((admission, compression, stats, read))
    }

    /// Returns transcoding stats and the number of archive bytes read
    fn restore_from_file(
        &self,
        file: File,
        compression: Compression,
        volume: &str,
    ) -> Result<(TranscodeStats, u64)> {
        // Best-effort probe; unknown size degrades to a spinner
        let total = file.metadata().ok().map(|meta| meta.len());
        let mut progress = self.progress(Operation::Restore, volume, total);

        let source = BufReader::new(ProgressReader::new(file, Some(progress.sink())));
        let mut decompressor = decompressor_for(source, compression)?;

        let mut session = self.gateway.import(volume)?;
        let outcome = transcode(&mut decompressor, session.writer())
            .and_then(|(_, stats)| decompressor.finish().map(|_| stats));
        let stats = session.finish(outcome)?;

        progress.finish();
        Ok((stats, progress.bytes()))
    }
}

fn open_archive(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| BackupError::InvalidPath {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Codec of a downloaded archive: by key suffix, else by magic number
fn staged_compression(remote: &RemotePath, staging: &Path) -> Result<Compression> {
    if let Some(compression) = Compression::from_archive_name(remote.key()) {
        return Ok(compression);
    }
    let mut header = Vec::with_capacity(4);
    File::open(staging)?.take(4).read_to_end(&mut header)?;
    let sniffed = Compression::sniff(&header);
    debug!("{} has no archive suffix, content looks like {}", remote, sniffed);
    Ok(sniffed)
}

fn list_file(file: File, compression: Compression) -> Result<Vec<ArchiveEntry>> {
    let mut decompressor = decompressor_for(BufReader::new(file), compression)?;
    let entries = read_entries(&mut decompressor)?;
    decompressor.finish()?;
    Ok(entries)
}

/// Remove a staging file, logging rather than failing
fn discard(staging: TempPath) {
    if let Err(e) = remove_staging(staging) {
        warn!("{}", e);
    }
}

/// A staging file already removed by a failed step counts as removed
fn remove_staging(staging: TempPath) -> Result<()> {
    let path = staging.to_path_buf();
    match staging.close() {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Staging file {} already gone", path.display());
            Ok(())
        }
        Err(e) => Err(BackupError::Cleanup(format!(
            "removing {}: {}",
            path.display(),
            e
        ))),
    }
}
