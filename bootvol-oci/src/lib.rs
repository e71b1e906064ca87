//! OCI Distribution plumbing for bootvol: image reference parsing, manifest
//! and index resolution, registry auth, streaming blob access, and the
//! on-disk content-addressed blob cache.
//!
//! Everything here is blocking.  Callers that live inside an async runtime
//! run it on a blocking thread.

pub mod auth;
pub mod cache;
pub mod error;
pub mod manifest;
pub mod reference;
pub mod registry;

pub use auth::Credentials;
pub use cache::{sha256_digest, BlobCache};
pub use error::{OciError, Result};
pub use manifest::{Descriptor, ImageConfig, ManifestDocument, OciManifest, Platform};
pub use reference::ImageRef;
pub use registry::{RegistryClient, RegistryConfig};
