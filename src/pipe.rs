/*!
 * Bounded in-memory byte pipe between a producer and a consumer thread
 *
 * Writes are copied into chunks and sent over a bounded channel, so a fast
 * producer blocks once `capacity` chunks are in flight. Dropping the writer
 * ends the stream (the reader sees EOF); dropping the reader makes further
 * writes fail with `BrokenPipe`.
 */

use std::io::{self, Read, Write};

use crossbeam_channel::{bounded as channel, Receiver, Sender};

/// Largest chunk carried per message
pub const MAX_CHUNK: usize = 64 * 1024;

/// Default number of in-flight chunks
pub const DEFAULT_CAPACITY: usize = 16;

/// Create a connected writer/reader pair
pub fn bounded(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = channel(capacity.max(1));
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            current: Vec::new(),
            pos: 0,
        },
    )
}

pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(MAX_CHUNK);
        // Blocks while the channel is full
        self.tx.send(buf[..n].to_vec()).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader has been dropped")
        })?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    current: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.current.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.current = chunk;
                    self.pos = 0;
                }
                // All writers gone: end of stream
                Err(_) => return Ok(0),
            }
        }
        let available = &self.current[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_bytes_arrive_in_order() {
        let (mut writer, mut reader) = bounded(2);
        let data: Vec<u8> = (0..300_000u32).map(|i| (i % 253) as u8).collect();
        let expected = data.clone();

        let producer = thread::spawn(move || {
            for piece in data.chunks(10_007) {
                writer.write_all(piece).unwrap();
            }
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        producer.join().unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_writer_drop_is_eof() {
        let (mut writer, mut reader) = bounded(4);
        writer.write_all(b"abc").unwrap();
        drop(writer);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(reader.read(&mut [0u8; 8]).unwrap(), 0);
    }

    #[test]
    fn test_reader_drop_is_broken_pipe() {
        let (mut writer, reader) = bounded(1);
        drop(reader);
        let err = writer.write(b"abc").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_small_reads_split_chunks() {
        let (mut writer, mut reader) = bounded(1);
        writer.write_all(b"hello world").unwrap();
        drop(writer);

        let mut buf = [0u8; 4];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            assert!(n <= 4);
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"hello world");
    }
}
