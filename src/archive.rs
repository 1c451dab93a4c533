/*!
 * Tar re-framing between a source stream and a sink stream
 *
 * The same loop serves backup (volume export -> archive file) and restore
 * (archive file -> volume import): headers are pulled one at a time, written
 * to the sink, and followed by exactly `size` bytes for regular files.
 */

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use tar::{Archive, Builder, EntryType};
use tracing::{debug, trace};

use crate::error::{BackupError, Result};

/// Counters for one transcoding pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscodeStats {
    pub entries: u64,
    pub files: u64,
    pub directories: u64,
    pub links: u64,
    pub other: u64,
    /// Content bytes of regular files
    pub bytes: u64,
}

/// Kind of filesystem object an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    HardLink,
    Other,
}

impl EntryKind {
    fn of(entry_type: EntryType) -> EntryKind {
        match entry_type {
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Directory => EntryKind::Directory,
            EntryType::Symlink => EntryKind::Symlink,
            EntryType::Link => EntryKind::HardLink,
            _ => EntryKind::Other,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            EntryKind::File => "file",
            EntryKind::Directory => "dir",
            EntryKind::Symlink => "symlink",
            EntryKind::HardLink => "hardlink",
            EntryKind::Other => "other",
        };
        f.write_str(tag)
    }
}

/// Metadata of one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub mode: u32,
    pub mtime: u64,
    pub link_target: Option<PathBuf>,
}

/// Copy every entry of the tar stream in `source` into a new tar stream on
/// `sink`, then terminate it. Returns the sink, still open.
pub fn transcode<R: Read, W: Write>(source: R, sink: W) -> Result<(W, TranscodeStats)> {
    let mut archive = Archive::new(source);
    let mut builder = Builder::new(sink);
    let mut stats = TranscodeStats::default();

    let entries = archive
        .entries()
        .map_err(|e| BackupError::archive("open archive", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| BackupError::archive("read entry header", e))?;
        let entry_type = entry.header().entry_type();

        match entry_type {
            // Carries no filesystem object
            EntryType::XGlobalHeader => {
                trace!("Skipping PAX global header");
                continue;
            }
            EntryType::GNUSparse => {
                return Err(BackupError::archive(
                    "sparse entry",
                    io::Error::new(
                        io::ErrorKind::Unsupported,
                        "GNU sparse files are not supported",
                    ),
                ));
            }
            _ => {}
        }

        let path = entry
            .path()
            .map_err(|e| BackupError::archive("entry path", e))?
            .into_owned();
        let extensions = pax_records(&mut entry, &path)?;
        if !extensions.is_empty() {
            builder
                .append_pax_extensions(
                    extensions
                        .iter()
                        .map(|(key, value)| (key.as_str(), value.as_slice())),
                )
                .map_err(|e| BackupError::archive(format!("extensions of {}", path.display()), e))?;
        }
        let mut header = entry.header().clone();
        stats.entries += 1;

        match EntryKind::of(entry_type) {
            EntryKind::File => {
                let size = entry.size();
                header.set_size(size);
                builder
                    .append_data(&mut header, &path, ExactReader::new(&mut entry, size))
                    .map_err(|e| BackupError::archive(format!("copy {}", path.display()), e))?;
                stats.files += 1;
                stats.bytes += size;
            }
            EntryKind::Symlink | EntryKind::HardLink => {
                let target = link_target(&entry, &path)?;
                header.set_size(0);
                builder
                    .append_link(&mut header, &path, &target)
                    .map_err(|e| BackupError::archive(format!("link {}", path.display()), e))?;
                stats.links += 1;
            }
            kind => {
                header.set_size(0);
                builder
                    .append_data(&mut header, &path, io::empty())
                    .map_err(|e| BackupError::archive(format!("write {}", path.display()), e))?;
                if kind == EntryKind::Directory {
                    stats.directories += 1;
                } else {
                    stats.other += 1;
                }
            }
        }
    }

    let sink = builder
        .into_inner()
        .map_err(|e| BackupError::archive("terminate archive", e))?;

    debug!(
        "Transcoded {} entries ({} files, {} bytes)",
        stats.entries, stats.files, stats.bytes
    );
    Ok((sink, stats))
}

/// List the entries of a tar stream without extracting anything
pub fn read_entries<R: Read>(source: R) -> Result<Vec<ArchiveEntry>> {
    let mut archive = Archive::new(source);
    let mut listed = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| BackupError::archive("open archive", e))?
    {
        let entry = entry.map_err(|e| BackupError::archive("read entry header", e))?;
        let header = entry.header();
        if header.entry_type() == EntryType::XGlobalHeader {
            continue;
        }

        let path = entry
            .path()
            .map_err(|e| BackupError::archive("entry path", e))?
            .into_owned();
        let kind = EntryKind::of(header.entry_type());
        let link_target = match kind {
            EntryKind::Symlink | EntryKind::HardLink => Some(link_target(&entry, &path)?),
            _ => None,
        };

        listed.push(ArchiveEntry {
            size: if kind == EntryKind::File { entry.size() } else { 0 },
            mode: header.mode().unwrap_or(0),
            mtime: header.mtime().unwrap_or(0),
            path,
            kind,
            link_target,
        });
    }

    Ok(listed)
}

/// Per-entry PAX records to carry over. Path, link target and size are
/// re-encoded by the builder from the entry itself.
fn pax_records<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    path: &std::path::Path,
) -> Result<Vec<(String, Vec<u8>)>> {
    let context = || format!("extensions of {}", path.display());
    let Some(extensions) = entry
        .pax_extensions()
        .map_err(|e| BackupError::archive(context(), e))?
    else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for extension in extensions {
        let extension = extension.map_err(|e| BackupError::archive(context(), e))?;
        let key = extension.key().map_err(|e| {
            BackupError::archive(context(), io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        if matches!(key, "path" | "linkpath" | "size") {
            continue;
        }
        records.push((key.to_string(), extension.value_bytes().to_vec()));
    }
    Ok(records)
}

fn link_target<R: Read>(entry: &tar::Entry<'_, R>, path: &std::path::Path) -> Result<PathBuf> {
    entry
        .link_name()
        .map_err(|e| BackupError::archive(format!("link target of {}", path.display()), e))?
        .map(|target| target.into_owned())
        .ok_or_else(|| {
            BackupError::archive(
                format!("link target of {}", path.display()),
                io::Error::new(io::ErrorKind::InvalidData, "link entry has no target"),
            )
        })
}

/// Yields exactly `remaining` bytes or fails
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(self.remaining.min(usize::MAX as u64) as usize);
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("entry content truncated, {} bytes missing", self.remaining),
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tar::Header;

    fn file_header(size: u64, mode: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(mode);
        header.set_mtime(0);
        header
    }

    fn sample_archive() -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());

        let mut dir = Header::new_gnu();
        dir.set_entry_type(EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o755);
        builder.append_data(&mut dir, "sub", io::empty()).unwrap();

        let mut hello = file_header(13, 0o644);
        builder
            .append_data(&mut hello, "hello.txt", &b"Hello, World!"[..])
            .unwrap();

        let long_name = format!("sub/{}/deep.txt", "x".repeat(150));
        let mut deep = file_header(4, 0o600);
        builder.append_data(&mut deep, &long_name, &b"deep"[..]).unwrap();

        let mut link = Header::new_gnu();
        link.set_entry_type(EntryType::Symlink);
        link.set_size(0);
        builder.append_link(&mut link, "sub/link", "../hello.txt").unwrap();

        builder.into_inner().unwrap()
    }

    #[test]
    fn test_transcode_preserves_entries() {
        let source = sample_archive();
        let (out, stats) = transcode(source.as_slice(), Vec::new()).unwrap();

        assert_eq!(stats.entries, 4);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.links, 1);
        assert_eq!(stats.bytes, 17);

        assert_eq!(
            read_entries(source.as_slice()).unwrap(),
            read_entries(out.as_slice()).unwrap()
        );
    }

    #[test]
    fn test_transcode_content_is_verbatim() {
        let (out, _) = transcode(sample_archive().as_slice(), Vec::new()).unwrap();
        let mut archive = Archive::new(out.as_slice());
        let mut contents = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut data = String::new();
            entry.read_to_string(&mut data).unwrap();
            contents.push((entry.path().unwrap().into_owned(), data));
        }
        assert!(contents.contains(&(PathBuf::from("hello.txt"), "Hello, World!".to_string())));
        let long = contents
            .iter()
            .find(|(p, _)| p.ends_with("deep.txt"))
            .unwrap();
        assert_eq!(long.0.to_string_lossy().len(), 4 + 150 + 9);
        assert_eq!(long.1, "deep");
    }

    fn pax_of(archive: &[u8]) -> Vec<(PathBuf, Vec<(String, String)>)> {
        let mut archive = Archive::new(archive);
        let mut seen = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().into_owned();
            let records = match entry.pax_extensions().unwrap() {
                Some(extensions) => extensions
                    .map(|ext| {
                        let ext = ext.unwrap();
                        (
                            ext.key().unwrap().to_string(),
                            ext.value().unwrap().to_string(),
                        )
                    })
                    .collect(),
                None => Vec::new(),
            };
            seen.push((path, records));
        }
        seen
    }

    #[test]
    fn test_transcode_keeps_pax_records() {
        let owner = "a-very-long-user-name-exceeding-thirty-two-bytes";
        let long_path = format!("dir/{}/f.txt", "p".repeat(120));

        let mut builder = Builder::new(Vec::new());
        builder
            .append_pax_extensions([
                ("SCHILY.xattr.security.capability", &b"cap"[..]),
                ("uname", owner.as_bytes()),
                ("path", long_path.as_bytes()),
            ])
            .unwrap();
        let mut header = Header::new_ustar();
        header.set_entry_type(EntryType::Regular);
        header.set_size(2);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, "f.txt", &b"hi"[..]).unwrap();
        let mut plain = file_header(1, 0o644);
        builder.append_data(&mut plain, "plain.txt", &b"x"[..]).unwrap();
        let source = builder.into_inner().unwrap();

        let (out, stats) = transcode(source.as_slice(), Vec::new()).unwrap();
        assert_eq!(stats.files, 2);

        let copied = pax_of(&out);
        assert_eq!(
            copied,
            vec![
                (
                    PathBuf::from(&long_path),
                    vec![
                        ("SCHILY.xattr.security.capability".to_string(), "cap".to_string()),
                        ("uname".to_string(), owner.to_string()),
                    ]
                ),
                (PathBuf::from("plain.txt"), Vec::new()),
            ]
        );
    }

    #[test]
    fn test_output_is_terminated() {
        let (out, _) = transcode(sample_archive().as_slice(), Vec::new()).unwrap();
        assert_eq!(out.len() % 512, 0);
        assert!(out[out.len() - 1024..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_archive() {
        let empty = Builder::new(Vec::new()).into_inner().unwrap();
        let (out, stats) = transcode(empty.as_slice(), Vec::new()).unwrap();
        assert_eq!(stats, TranscodeStats::default());
        assert!(read_entries(out.as_slice()).unwrap().is_empty());
    }

    #[test]
    fn test_truncated_content_fails() {
        let source = sample_archive();
        // Cut inside hello.txt's content block (dir header + file header + 5 bytes)
        let truncated = &source[..512 * 2 + 5];
        let err = transcode(truncated, Vec::new()).unwrap_err();
        assert!(matches!(err, BackupError::Archive { .. }));
    }

    #[test]
    fn test_corrupt_header_fails() {
        let mut source = sample_archive();
        // Break the checksum of the first header
        source[148] ^= 0x11;
        let err = transcode(source.as_slice(), Vec::new()).unwrap_err();
        assert!(matches!(err, BackupError::Archive { .. }));
    }

    #[test]
    fn test_read_entries_metadata() {
        let entries = read_entries(sample_archive().as_slice()).unwrap();
        let hello = entries
            .iter()
            .find(|e| e.path == PathBuf::from("hello.txt"))
            .unwrap();
        assert_eq!(hello.kind, EntryKind::File);
        assert_eq!(hello.size, 13);
        assert_eq!(hello.mode, 0o644);

        let link = entries.iter().find(|e| e.kind == EntryKind::Symlink).unwrap();
        assert_eq!(link.link_target, Some(PathBuf::from("../hello.txt")));
        assert_eq!(link.size, 0);
    }

    #[test]
    fn test_exact_reader() {
        let mut exact = ExactReader::new(&b"abcdef"[..], 4);
        let mut out = Vec::new();
        exact.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");

        let mut short = ExactReader::new(&b"ab"[..], 4);
        let err = short.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
