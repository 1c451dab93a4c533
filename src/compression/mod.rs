/*!
 * Streaming compression adapters for archive streams
 *
 * A [`Compressor`] wraps a sink and a [`Decompressor`] wraps a source; both
 * dispatch on [`Compression`] and never buffer more than the codec's own
 * window. Neither adapter closes the wrapped stream: `finish` hands it back.
 */

use std::io::{self, BufReader, Read, Write};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use tracing::debug;
use zstd::stream::{read::Decoder as ZstdDecoder, write::Encoder as ZstdEncoder};

use crate::config::Compression;
use crate::error::{BackupError, Result};

/// Default gzip level
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Default zstd level
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Compressing writer over a sink
pub enum Compressor<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
    Zstd(ZstdEncoder<'static, W>),
}

impl<W: Write> Compressor<W> {
    /// Write the codec trailer and return the wrapped sink, still open
    pub fn finish(self) -> Result<W> {
        match self {
            Compressor::Plain(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Compressor::Gzip(encoder) => encoder
                .finish()
                .map_err(|e| BackupError::Compression(format!("gzip trailer: {}", e))),
            Compressor::Zstd(encoder) => encoder
                .finish()
                .map_err(|e| BackupError::Compression(format!("zstd epilogue: {}", e))),
        }
    }
}

impl<W: Write> Write for Compressor<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Plain(w) => w.write(buf),
            Compressor::Gzip(w) => w.write(buf),
            Compressor::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Plain(w) => w.flush(),
            Compressor::Gzip(w) => w.flush(),
            Compressor::Zstd(w) => w.flush(),
        }
    }
}

/// Decompressing reader over a source
pub enum Decompressor<R: Read> {
    Plain(R),
    Gzip(MultiGzDecoder<R>),
    Zstd(ZstdDecoder<'static, BufReader<R>>),
}

impl<R: Read> Decompressor<R> {
    /// Drain the remaining input so a bad trailer or trailing garbage
    /// surfaces as an error. Returns the number of decompressed bytes drained.
    pub fn finish(mut self) -> Result<u64> {
        let codec = self.compression();
        let drained = io::copy(&mut self, &mut io::sink())
            .map_err(|e| BackupError::Decompression(format!("{} stream: {}", codec, e)))?;
        if drained > 0 {
            debug!("Drained {} trailing bytes after end of archive", drained);
        }
        Ok(drained)
    }

    pub fn compression(&self) -> Compression {
        match self {
            Decompressor::Plain(_) => Compression::None,
            Decompressor::Gzip(_) => Compression::Gzip,
            Decompressor::Zstd(_) => Compression::Zstd,
        }
    }
}

impl<R: Read> Read for Decompressor<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Plain(r) => r.read(buf),
            Decompressor::Gzip(r) => r.read(buf),
            Decompressor::Zstd(r) => r.read(buf),
        }
    }
}

/// Wrap a sink with the default level for the selected codec
pub fn compressor<W: Write>(sink: W, compression: Compression) -> Result<Compressor<W>> {
    let level = match compression {
        Compression::None => 0,
        Compression::Gzip => DEFAULT_GZIP_LEVEL as i32,
        Compression::Zstd => DEFAULT_ZSTD_LEVEL,
    };
    compressor_with_level(sink, compression, level)
}

/// Wrap a sink with an explicit compression level
pub fn compressor_with_level<W: Write>(
    sink: W,
    compression: Compression,
    level: i32,
) -> Result<Compressor<W>> {
    match compression {
        Compression::None => Ok(Compressor::Plain(sink)),
        Compression::Gzip => {
            let level = level.clamp(0, 9) as u32;
            Ok(Compressor::Gzip(GzEncoder::new(
                sink,
                flate2::Compression::new(level),
            )))
        }
        Compression::Zstd => ZstdEncoder::new(sink, level)
            .map(Compressor::Zstd)
            .map_err(|e| BackupError::Compression(format!("zstd encoder: {}", e))),
    }
}

/// Wrap a source, inferring the codec from the archive name.
///
/// Unrecognised suffixes are read as plain tar.
pub fn decompressor<R: Read>(source: R, name: &str) -> Result<Decompressor<R>> {
    let compression = Compression::from_archive_name(name).unwrap_or(Compression::None);
    debug!("Reading {} as {}", name, compression);
    decompressor_for(source, compression)
}

/// Wrap a source with a known codec
pub fn decompressor_for<R: Read>(source: R, compression: Compression) -> Result<Decompressor<R>> {
    match compression {
        Compression::None => Ok(Decompressor::Plain(source)),
        Compression::Gzip => Ok(Decompressor::Gzip(MultiGzDecoder::new(source))),
        Compression::Zstd => ZstdDecoder::new(source)
            .map(Decompressor::Zstd)
            .map_err(|e| BackupError::Decompression(format!("zstd decoder: {}", e))),
    }
}
