/*!
 * Byte-counting stream wrappers and per-operation progress reporting
 */

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

/// Receives byte counts from an instrumented stream
pub trait ProgressSink {
    fn advance(&self, bytes: u64);
}

impl ProgressSink for ProgressBar {
    fn advance(&self, bytes: u64) {
        self.inc(bytes);
    }
}

/// Shared monotonically increasing byte counter
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl ProgressSink for ByteCounter {
    fn advance(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }
}

/// Reader that reports every successful read to a sink
pub struct ProgressReader<R, P> {
    inner: R,
    sink: Option<P>,
}

impl<R: Read, P: ProgressSink> ProgressReader<R, P> {
    pub fn new(inner: R, sink: Option<P>) -> Self {
        Self { inner, sink }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read, P: ProgressSink> Read for ProgressReader<R, P> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(sink) = &self.sink {
            sink.advance(n as u64);
        }
        Ok(n)
    }
}

/// Writer that reports every successful write to a sink
pub struct ProgressWriter<W, P> {
    inner: W,
    sink: Option<P>,
}

impl<W: Write, P: ProgressSink> ProgressWriter<W, P> {
    pub fn new(inner: W, sink: Option<P>) -> Self {
        Self { inner, sink }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write, P: ProgressSink> Write for ProgressWriter<W, P> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(sink) = &self.sink {
            sink.advance(n as u64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Progress for one backup or restore.
///
/// Always counts bytes; renders a bar only when enabled. A known, non-zero
/// total gives a determinate bar, otherwise a spinner. Finished exactly once,
/// either by [`TransferProgress::finish`] or on drop (abandoned).
pub struct TransferProgress {
    counter: ByteCounter,
    bar: Option<ProgressBar>,
    finished: bool,
}

impl TransferProgress {
    pub fn new(enabled: bool, label: &str, total: Option<u64>) -> Self {
        let bar = if enabled {
            let bar = match total {
                Some(total) if total > 0 => {
                    let bar = ProgressBar::new(total);
                    bar.set_style(
                        ProgressStyle::default_bar()
                            .template("{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("#>-"),
                    );
                    bar
                }
                _ => {
                    let bar = ProgressBar::new_spinner();
                    bar.set_style(
                        ProgressStyle::default_spinner()
                            .template("{msg}\n{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})")
                            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                    );
                    bar
                }
            };
            bar.set_message(label.to_string());
            Some(bar)
        } else {
            None
        };

        Self {
            counter: ByteCounter::new(),
            bar,
            finished: false,
        }
    }

    /// Progress that only counts
    pub fn hidden() -> Self {
        Self::new(false, "", None)
    }

    /// Sink handle for an instrumented stream
    pub fn sink(&self) -> ProgressHandle {
        ProgressHandle {
            counter: self.counter.clone(),
            bar: self.bar.clone(),
        }
    }

    pub fn bytes(&self) -> u64 {
        self.counter.get()
    }

    pub fn is_visible(&self) -> bool {
        self.bar.is_some()
    }

    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(bar) = &self.bar {
            bar.finish();
        }
    }
}

impl Drop for TransferProgress {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            if let Some(bar) = &self.bar {
                bar.abandon();
            }
        }
    }
}

/// Cloneable sink feeding a [`TransferProgress`]
#[derive(Clone)]
pub struct ProgressHandle {
    counter: ByteCounter,
    bar: Option<ProgressBar>,
}

impl ProgressSink for ProgressHandle {
    fn advance(&self, bytes: u64) {
        self.counter.advance(bytes);
        if let Some(bar) = &self.bar {
            ProgressSink::advance(bar, bytes);
        }
    }
}
