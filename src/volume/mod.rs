/*!
 * Volume access: store operations and byte-stream gateways
 *
 * A [`VolumeStore`] answers questions about volumes and mutates them as a
 * whole. A [`VolumeGateway`] opens a session that exposes one volume's file
 * tree as a tar byte stream (export) or accepts one (import). Each session
 * owns its execution context and the bridge moving bytes in or out of it;
 * `finish` tears both down and merges their outcome with the stream's.
 */

pub mod directory;
pub mod docker;
pub mod scope;

use std::io::{self, Read, Write};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{settle, BackupError, Result};

pub use directory::{DirectoryGateway, DirectoryVolumes};
pub use docker::DockerCli;
pub use scope::Scoped;

fn volume_name_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$"))
        .as_ref()
        .map_err(|e| BackupError::Config(format!("volume name pattern: {}", e)))
}

/// Check a volume name against the accepted grammar
pub fn validate_volume_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.starts_with('-') || name.starts_with('.') {
        "name must start with a letter or digit"
    } else if !volume_name_pattern()?.is_match(name) {
        "only letters, digits, '_', '.' and '-' are allowed"
    } else {
        return Ok(());
    };
    Err(BackupError::InvalidVolumeName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// Whole-volume operations
pub trait VolumeStore: Send + Sync {
    fn validate_name(&self, name: &str) -> Result<()> {
        validate_volume_name(name)
    }

    fn exists(&self, name: &str) -> Result<bool>;

    fn create(&self, name: &str) -> Result<()>;

    /// Remove every entry, hidden ones included, keeping the volume itself
    fn clear(&self, name: &str) -> Result<()>;

    fn is_empty(&self, name: &str) -> Result<bool>;

    /// Best-effort size in bytes; 0 when unknown
    fn estimate_size(&self, name: &str) -> u64;

    /// Create the volume unless it already exists
    fn ensure_exists(&self, name: &str) -> Result<()> {
        if !self.exists(name)? {
            self.create(name)?;
        }
        Ok(())
    }

    /// Check that the backing service is reachable
    fn preflight(&self) -> Result<()> {
        Ok(())
    }
}

/// Opens streaming sessions against a volume
pub trait VolumeGateway: Send + Sync {
    fn export(&self, volume: &str) -> Result<ExportSession>;

    fn import(&self, volume: &str) -> Result<ImportSession>;
}

/// Whatever moves the bytes between the session stream and the volume
pub trait Bridge: Send {
    /// Wait for completion after the session stream has been closed
    fn wait(self: Box<Self>) -> Result<()>;
}

/// A volume's file tree as a tar byte stream
pub struct ExportSession {
    reader: Box<dyn Read + Send>,
    bridge: Box<dyn Bridge>,
    scope: Scoped<String>,
}

impl ExportSession {
    pub fn new(reader: Box<dyn Read + Send>, bridge: Box<dyn Bridge>, scope: Scoped<String>) -> Self {
        Self {
            reader,
            bridge,
            scope,
        }
    }

    pub fn reader(&mut self) -> &mut (dyn Read + Send) {
        self.reader.as_mut()
    }

    /// Close the stream, wait for the bridge and release the context.
    ///
    /// `outcome` is the result of consuming the stream; it takes precedence
    /// over a bridge failure.
    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let ExportSession {
            mut reader,
            bridge,
            scope,
        } = self;

        // Consume trailing padding so the producer is not cut off
        let outcome = outcome.and_then(|value| {
            io::copy(&mut reader, &mut io::sink())?;
            Ok(value)
        });
        drop(reader);

        let bridged = bridge.wait();
        release(scope);
        merge(outcome, bridged)
    }
}

/// A sink that materializes a tar byte stream into a volume
pub struct ImportSession {
    writer: Box<dyn Write + Send>,
    bridge: Box<dyn Bridge>,
    scope: Scoped<String>,
}

impl ImportSession {
    pub fn new(writer: Box<dyn Write + Send>, bridge: Box<dyn Bridge>, scope: Scoped<String>) -> Self {
        Self {
            writer,
            bridge,
            scope,
        }
    }

    pub fn writer(&mut self) -> &mut (dyn Write + Send) {
        self.writer.as_mut()
    }

    /// Close the stream (EOF for the consumer), wait for the bridge and
    /// release the context.
    pub fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let ImportSession {
            mut writer,
            bridge,
            scope,
        } = self;

        let outcome = outcome.and_then(|value| {
            writer.flush()?;
            Ok(value)
        });
        drop(writer);

        let bridged = bridge.wait();
        release(scope);
        merge(outcome, bridged)
    }
}

fn release(scope: Scoped<String>) {
    let handle = scope.handle().clone();
    match scope.release() {
        Ok(()) => debug!("Released context {}", handle),
        Err(e) => warn!("Failed to release context {}: {}", handle, e),
    }
}

/// Stream errors win. When the stream only saw the bridge hang up, the
/// bridge's failure is attached to it as a diagnostic.
fn merge<T>(stream: Result<T>, bridge: Result<()>) -> Result<T> {
    match (stream, bridge) {
        (Err(e), Err(cause)) if is_broken_pipe(&e) => Err(e.annotate(&cause.to_string())),
        (stream, bridge) => settle(stream, bridge),
    }
}

fn is_broken_pipe(err: &BackupError) -> bool {
    match err {
        BackupError::Io(e) | BackupError::Archive { source: e, .. } => {
            e.kind() == io::ErrorKind::BrokenPipe
        }
        _ => false,
    }
}
