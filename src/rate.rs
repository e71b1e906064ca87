//! Throughput instrumentation for byte streams.

use std::fmt;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use indicatif::HumanBytes;

/// Bytes moved over a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rate {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Rate {
    /// Throughput in bytes per second.  A window that has not started or has
    /// zero length reports `0.0`; the result is always finite.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }

    /// Whether the window is long enough to compute a meaningful rate.
    pub fn is_available(&self) -> bool {
        !self.elapsed.is_zero()
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_available() {
            return f.write_str("n/a");
        }
        write!(f, "{}/s", HumanBytes(self.bytes_per_sec().round() as u64))
    }
}

/// Pass-through reader that counts bytes and times the transfer.
///
/// The clock starts at the first read call that yields data, so time spent
/// before the copy begins is not charged to the transfer.  It stops the first
/// time the inner reader reports end of stream.
#[derive(Debug)]
pub struct RateReader<R> {
    inner: R,
    bytes: u64,
    started: Option<Instant>,
    finished: Option<Instant>,
}

impl<R> RateReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            bytes: 0,
            started: None,
            finished: None,
        }
    }

    /// Current rate.  Before end of stream, "now" stands in for the end.
    pub fn rate(&self) -> Rate {
        let elapsed = match self.started {
            None => Duration::ZERO,
            Some(start) => self
                .finished
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(start),
        };
        Rate {
            bytes: self.bytes,
            elapsed,
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for RateReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let called = Instant::now();
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.started.get_or_insert(called);
            self.bytes += n as u64;
        } else if !buf.is_empty() && self.finished.is_none() {
            self.finished = Some(Instant::now());
        }
        Ok(n)
    }
}
