//! Streaming population of destinations from resolved layers.
//!
//! Bytes move through one bounded buffer; nothing is ever held whole in
//! memory.  A failed copy is not rolled back: whatever reached the sink
//! stays there.  Use [`Populator::populate_file_atomic`] when a file
//! destination must only ever hold a complete payload.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::layer::{Compression, ResolvedLayer};
use crate::rate::{Rate, RateReader};

/// Default copy buffer size (1 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 20;

/// Upper bound accepted for the copy buffer (64 MiB).
pub const MAX_BUFFER_SIZE: usize = 64 << 20;

/// Which side of a copy failed, and how far the copy got.
#[derive(Error, Debug)]
pub enum PopulateError {
    #[error("read failed after {copied} bytes: {source}")]
    Read {
        copied: u64,
        #[source]
        source: io::Error,
    },

    #[error("write failed after {copied} bytes: {source}")]
    Write {
        copied: u64,
        #[source]
        source: io::Error,
    },
}

impl PopulateError {
    /// Bytes committed to the sink before the failure.
    pub fn copied(&self) -> u64 {
        match self {
            PopulateError::Read { copied, .. } | PopulateError::Write { copied, .. } => *copied,
        }
    }
}

/// Copy `source` into `sink` until end of stream with the default buffer.
/// Returns the number of bytes copied.
pub fn populate<R: Read, W: Write>(source: R, sink: W) -> std::result::Result<u64, PopulateError> {
    copy_bounded(source, sink, DEFAULT_BUFFER_SIZE, &|_| {})
}

fn copy_bounded<R: Read, W: Write>(
    mut source: R,
    mut sink: W,
    buffer_size: usize,
    progress: &dyn Fn(u64),
) -> std::result::Result<u64, PopulateError> {
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut copied: u64 = 0;
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(source) => return Err(PopulateError::Read { copied, source }),
        };
        let mut pending = &buf[..n];
        while !pending.is_empty() {
            match sink.write(pending) {
                Ok(0) => {
                    return Err(PopulateError::Write {
                        copied,
                        source: ErrorKind::WriteZero.into(),
                    })
                }
                Ok(written) => {
                    copied += written as u64;
                    pending = &pending[written..];
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => return Err(PopulateError::Write { copied, source }),
            }
        }
        progress(n as u64);
    }
    sink.flush()
        .map_err(|source| PopulateError::Write { copied, source })?;
    Ok(copied)
}

/// Outcome of a successful population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopulateReport {
    pub bytes: u64,
    pub rate: Rate,
}

/// Copies resolved layers into sinks, devices and files.
pub struct Populator {
    buffer_size: usize,
    sync: bool,
    progress: Option<Box<dyn Fn(u64) + Send + Sync>>,
}

impl Default for Populator {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            sync: true,
            progress: None,
        }
    }
}

impl Populator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the copy buffer size, clamped to `1..=MAX_BUFFER_SIZE`.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.clamp(1, MAX_BUFFER_SIZE);
        self
    }

    /// Whether device and file destinations are fsynced after the copy.
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Called with the size of every chunk written.
    pub fn with_progress(mut self, progress: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Copy an arbitrary stream with this populator's buffer and progress hook.
    pub fn copy<R: Read, W: Write>(
        &self,
        source: R,
        sink: W,
    ) -> std::result::Result<u64, PopulateError> {
        let report = |n: u64| {
            if let Some(progress) = &self.progress {
                progress(n);
            }
        };
        copy_bounded(source, sink, self.buffer_size, &report)
    }

    /// Stream a resolved layer's payload into `sink`, decompressing it if the
    /// layer was stored compressed.
    pub fn populate_layer<W: Write>(&self, layer: &ResolvedLayer, sink: W) -> Result<PopulateReport> {
        self.populate_into(layer, sink, "sink")
    }

    /// Stream a layer onto a block device or into a regular file at `dest`.
    ///
    /// Block devices are opened for writing in place and must be large enough
    /// for an uncompressed payload.  Anything else is created or truncated.
    pub fn populate_device(&self, layer: &ResolvedLayer, dest: &Path) -> Result<PopulateReport> {
        let block = is_block_device(dest);
        let mut file = OpenOptions::new()
            .write(true)
            .create(!block)
            .truncate(!block)
            .open(dest)
            .map_err(|source| Error::Open {
                path: dest.to_path_buf(),
                source,
            })?;

        if block {
            let capacity = device_capacity(&mut file).map_err(|source| Error::Open {
                path: dest.to_path_buf(),
                source,
            })?;
            ensure_fits(layer, dest, capacity)?;
        }

        let label = dest.display().to_string();
        let report = self.populate_into(layer, &mut file, &label)?;
        if self.sync {
            file.sync_all()
                .map_err(|source| self.write_error(layer, &label, report.bytes, source))?;
        }
        Ok(report)
    }

    /// Stream a layer into a temporary file beside `dest` and rename it over
    /// `dest` only once the copy (and sync) succeeded.  On failure `dest` is
    /// left exactly as it was.
    ///
    /// `dest` must be a regular file or not exist yet.  Renaming over a
    /// device node would replace the node instead of writing to the device.
    pub fn populate_file_atomic(&self, layer: &ResolvedLayer, dest: &Path) -> Result<PopulateReport> {
        if let Ok(meta) = fs::metadata(dest) {
            if !meta.is_file() {
                return Err(Error::NotRegularFile {
                    dest: dest.to_path_buf(),
                });
            }
        }
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut staged = NamedTempFile::new_in(dir).map_err(|source| Error::Stage {
            dest: dest.to_path_buf(),
            source,
        })?;

        let label = dest.display().to_string();
        let report = self.populate_into(layer, staged.as_file_mut(), &label)?;
        if self.sync {
            staged
                .as_file()
                .sync_all()
                .map_err(|source| self.write_error(layer, &label, report.bytes, source))?;
        }
        staged.persist(dest).map_err(|e| Error::Stage {
            dest: dest.to_path_buf(),
            source: e.error,
        })?;
        debug!(dest = %dest.display(), "staged copy persisted");
        Ok(report)
    }

    fn populate_into<W: Write>(
        &self,
        layer: &ResolvedLayer,
        sink: W,
        dest: &str,
    ) -> Result<PopulateReport> {
        let descriptor = &layer.descriptor;
        // Dropped on every exit path, including errors.
        let source = File::open(&layer.path).map_err(|source| Error::Open {
            path: layer.path.clone(),
            source,
        })?;
        let decoded = decoder(descriptor.compression, source).map_err(|source| Error::Open {
            path: layer.path.clone(),
            source,
        })?;
        let mut reader = RateReader::new(decoded);

        info!(
            role = %descriptor.role,
            digest = %descriptor.digest,
            dest,
            "populating",
        );
        let bytes = self
            .copy(&mut reader, sink)
            .map_err(|source| Error::Populate {
                dest: dest.to_string(),
                role: descriptor.role,
                digest: descriptor.digest.clone(),
                source,
            })?;

        let rate = reader.rate();
        info!(role = %descriptor.role, dest, bytes, rate = %rate, "populated");
        Ok(PopulateReport { bytes, rate })
    }

    fn write_error(&self, layer: &ResolvedLayer, dest: &str, copied: u64, source: io::Error) -> Error {
        Error::Populate {
            dest: dest.to_string(),
            role: layer.descriptor.role,
            digest: layer.descriptor.digest.clone(),
            source: PopulateError::Write { copied, source },
        }
    }
}

/// Wrap `source` in the decoder matching its transport compression.
fn decoder<'a, R: Read + 'a>(compression: Compression, source: R) -> io::Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(io::BufReader::new(source)),
        // pigz and concatenated archives produce multi-member streams
        Compression::Gzip => Box::new(MultiGzDecoder::new(source)),
        Compression::Zstd => Box::new(zstd::Decoder::new(source)?),
    })
}

#[cfg(unix)]
fn is_block_device(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    fs::metadata(path)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_block_device(_path: &Path) -> bool {
    false
}

/// Reject payloads known to be larger than the destination.  Compressed
/// layers only reveal their size while streaming, so they pass.
fn ensure_fits(layer: &ResolvedLayer, dest: &Path, capacity: u64) -> Result<()> {
    let descriptor = &layer.descriptor;
    if descriptor.compression == Compression::None && descriptor.size > capacity {
        return Err(Error::DestinationTooSmall {
            dest: dest.to_path_buf(),
            role: descriptor.role,
            capacity,
            required: descriptor.size,
        });
    }
    Ok(())
}

/// Size of an open device, found by seeking to its end.
fn device_capacity(file: &mut File) -> io::Result<u64> {
    let size = file.seek(SeekFrom::End(0))?;
    file.seek(SeekFrom::Start(0))?;
    Ok(size)
}
