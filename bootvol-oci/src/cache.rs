//! On-disk blob store keyed by sha256 digest.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{OciError, Result};

const COPY_CHUNK: usize = 64 * 1024;

/// Blobs live at `<root>/blobs/sha256/<hex>`, the OCI image-layout naming.
#[derive(Debug, Clone)]
pub struct BlobCache {
    root: PathBuf,
}

impl BlobCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn sha256_dir(&self) -> PathBuf {
        self.root.join("blobs").join("sha256")
    }

    /// Hex part of `sha256:<hex>` (a bare hex string is accepted too).
    ///
    /// Anything other than 64 lowercase hex digits is rejected, so the result
    /// is always a safe file name.
    pub fn hex_from_digest(digest: &str) -> Result<&str> {
        let hex = match digest.split_once(':') {
            Some(("sha256", hex)) => hex,
            Some(_) => return Err(OciError::InvalidDigest(digest.to_string())),
            None => digest,
        };
        let valid = hex.len() == 64
            && hex
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(OciError::InvalidDigest(digest.to_string()));
        }
        Ok(hex)
    }

    /// `false` for malformed digests as well as absent blobs.
    pub fn has_blob(&self, digest: &str) -> bool {
        matches!(self.blob_path(digest), Ok(p) if p.is_file())
    }

    pub fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        Ok(self.sha256_dir().join(Self::hex_from_digest(digest)?))
    }

    /// Stream `reader` into the cache under `digest`, verifying the SHA-256
    /// of the bytes as they pass.  Returns the file path.
    ///
    /// Bytes land in a temporary file next to the final location and are
    /// renamed into place only after the digest matches, so a returned path
    /// always holds complete content.  An existing blob short-circuits
    /// without touching `reader`.
    pub fn store_stream<R: Read>(&self, digest: &str, mut reader: R) -> Result<PathBuf> {
        let expected = Self::hex_from_digest(digest)?;
        let dir = self.sha256_dir();
        let path = dir.join(expected);
        if path.is_file() {
            debug!(digest, "cache hit");
            return Ok(path);
        }

        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut written: u64 = 0;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            hasher.update(&buf[..n]);
            tmp.write_all(&buf[..n])?;
            written += n as u64;
        }

        let actual = hex_encode(&hasher.finalize());
        if actual != expected {
            return Err(OciError::DigestMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| OciError::Io(e.error))?;
        debug!(path = %path.display(), bytes = written, "stored blob");
        Ok(path)
    }

    /// In-memory variant of [`store_stream`](Self::store_stream).
    pub fn store_blob(&self, digest: &str, data: &[u8]) -> Result<PathBuf> {
        self.store_stream(digest, data)
    }
}

/// `sha256:<hex>` digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex_encode(&Sha256::digest(data)))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}
