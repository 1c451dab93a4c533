/*!
 * Host-directory volumes
 *
 * Each volume is a subdirectory of a root directory. The gateway tars a
 * volume on a producer thread (export) or untars into it on a consumer thread
 * (import), connected to the session through a bounded pipe.
 */

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::{Bridge, ExportSession, ImportSession, Scoped, VolumeGateway, VolumeStore};
use crate::error::{BackupError, Result};
use crate::pipe::{self, PipeReader, PipeWriter};

/// Volumes stored as subdirectories of `root`
#[derive(Debug, Clone)]
pub struct DirectoryVolumes {
    root: PathBuf,
}

impl DirectoryVolumes {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Host path of a volume
    pub fn path(&self, volume: &str) -> PathBuf {
        self.root.join(volume)
    }

    /// Gateway over the same root
    pub fn gateway(&self) -> DirectoryGateway {
        DirectoryGateway {
            volumes: self.clone(),
        }
    }

    fn existing(&self, volume: &str) -> Result<PathBuf> {
        let path = self.path(volume);
        if self.exists(volume)? {
            Ok(path)
        } else {
            Err(BackupError::VolumeNotFound(volume.to_string()))
        }
    }
}

impl VolumeStore for DirectoryVolumes {
    fn exists(&self, name: &str) -> Result<bool> {
        match fs::metadata(self.path(name)) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, name: &str) -> Result<()> {
        fs::create_dir_all(self.path(name))?;
        info!("Created volume {}", name);
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let dir = self.existing(name)?;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        debug!("Cleared {}", dir.display());
        Ok(())
    }

    fn is_empty(&self, name: &str) -> Result<bool> {
        let dir = self.existing(name)?;
        Ok(fs::read_dir(dir)?.next().is_none())
    }

    fn estimate_size(&self, name: &str) -> u64 {
        WalkDir::new(self.path(name))
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.metadata().ok())
            .map(|meta| meta.len())
            .sum()
    }

    fn preflight(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(BackupError::Config(format!(
                "volume root {} is not a directory",
                self.root.display()
            )))
        }
    }
}

/// Streams directory volumes through worker threads
#[derive(Debug, Clone)]
pub struct DirectoryGateway {
    volumes: DirectoryVolumes,
}

impl VolumeGateway for DirectoryGateway {
    fn export(&self, volume: &str) -> Result<ExportSession> {
        let dir = self.volumes.existing(volume)?;
        let (writer, reader) = pipe::bounded(pipe::DEFAULT_CAPACITY);
        let name = format!("export-{}", volume);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || write_tree(&dir, writer))?;

        Ok(ExportSession::new(
            Box::new(reader),
            Box::new(ThreadBridge { name, handle }),
            Scoped::unmanaged(volume.to_string()),
        ))
    }

    fn import(&self, volume: &str) -> Result<ImportSession> {
        let dir = self.volumes.existing(volume)?;
        let (writer, reader) = pipe::bounded(pipe::DEFAULT_CAPACITY);
        let name = format!("import-{}", volume);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || read_tree(&dir, reader))?;

        Ok(ImportSession::new(
            Box::new(writer),
            Box::new(ThreadBridge { name, handle }),
            Scoped::unmanaged(volume.to_string()),
        ))
    }
}

/// Tar `dir` (children only, sorted, symlinks kept as links) into the pipe
fn write_tree(dir: &Path, writer: PipeWriter) -> Result<()> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.mode(tar::HeaderMode::Complete);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry.path().strip_prefix(dir).map_err(|e| {
            BackupError::archive(
                format!("relative path of {}", entry.path().display()),
                io::Error::other(e),
            )
        })?;
        builder
            .append_path_with_name(entry.path(), relative)
            .map_err(|e| BackupError::archive(format!("add {}", relative.display()), e))?;
    }

    builder
        .into_inner()
        .map_err(|e| BackupError::archive("terminate archive", e))?;
    Ok(())
}

/// Unpack the pipe into `dir`, then drain whatever follows the archive
fn read_tree(dir: &Path, reader: PipeReader) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);
    archive
        .unpack(dir)
        .map_err(|e| BackupError::archive(format!("unpack into {}", dir.display()), e))?;

    let mut rest = archive.into_inner();
    io::copy(&mut rest, &mut io::sink())?;
    Ok(())
}

struct ThreadBridge {
    name: String,
    handle: JoinHandle<Result<()>>,
}

impl Bridge for ThreadBridge {
    fn wait(self: Box<Self>) -> Result<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(BackupError::Subprocess {
                command: self.name,
                status: "worker panicked".to_string(),
                output: String::new(),
            }),
        }
    }
}
