//! Content-addressed local store seam.

use std::io::Read;
use std::path::PathBuf;

use bootvol_oci::BlobCache;

/// Materializes content by digest and hands back stable local paths.
///
/// Implementations must only return a path from [`ContentStore::localize`]
/// once the content behind it is complete.
pub trait ContentStore {
    /// Whether content for `digest` is already present.
    fn contains(&self, digest: &str) -> bool;

    /// Where content for `digest` lives (or will live).
    fn path_for(&self, digest: &str) -> bootvol_oci::Result<PathBuf>;

    /// Read `content` to the end and store it under `digest`.
    fn localize(&self, digest: &str, content: &mut dyn Read) -> bootvol_oci::Result<PathBuf>;
}

impl ContentStore for BlobCache {
    fn contains(&self, digest: &str) -> bool {
        self.has_blob(digest)
    }

    fn path_for(&self, digest: &str) -> bootvol_oci::Result<PathBuf> {
        self.blob_path(digest)
    }

    fn localize(&self, digest: &str, content: &mut dyn Read) -> bootvol_oci::Result<PathBuf> {
        self.store_stream(digest, content)
    }
}

impl<S: ContentStore + ?Sized> ContentStore for &S {
    fn contains(&self, digest: &str) -> bool {
        (**self).contains(digest)
    }

    fn path_for(&self, digest: &str) -> bootvol_oci::Result<PathBuf> {
        (**self).path_for(digest)
    }

    fn localize(&self, digest: &str, content: &mut dyn Read) -> bootvol_oci::Result<PathBuf> {
        (**self).localize(digest, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootvol_oci::sha256_digest;

    #[test]
    fn blob_cache_localizes_and_dedups() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobCache::new(tmp.path().to_path_buf());
        let digest = sha256_digest(b"kernel image");

        assert!(!store.contains(&digest));
        let first = store.localize(&digest, &mut &b"kernel image"[..]).unwrap();
        assert!(store.contains(&digest));
        assert_eq!(store.path_for(&digest).unwrap(), first);

        let second = (&store)
            .localize(&digest, &mut &b"kernel image"[..])
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(second).unwrap(), b"kernel image");
    }
}
