//! bootvol: resolve bootable OCI images and stream them onto volumes.
//!
//! An image is an OCI artifact whose layers carry a kernel, an initial RAM
//! disk and a root filesystem, told apart by media type.  The
//! [`ImageResolver`] pulls those layers into a local content-addressed store
//! and refuses to hand back an [`Image`] unless all three are present.  The
//! [`Populator`] then streams any one of them into a file, a block device or
//! an arbitrary writer through a bounded buffer, measuring throughput as it
//! goes.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use bootvol::{BlobCache, ImageResolver, OciRegistry, Populator, RegistryConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = OciRegistry::new(RegistryConfig::default())?;
//!     let store = BlobCache::new("/var/lib/bootvol/cache".into());
//!     let resolver = ImageResolver::new(registry, store);
//!
//!     let image = resolver.resolve("ghcr.io/acme/os:v1")?;
//!     let report = Populator::new().populate_device(image.rootfs(), Path::new("/dev/vdb"))?;
//!     println!("wrote {} bytes at {}", report.bytes, report.rate);
//!     Ok(())
//! }
//! ```

// Pipeline
pub mod layer;
pub mod registry;
pub mod resolver;
pub mod store;

// Streaming
pub mod populate;
pub mod rate;

pub mod class;
pub mod config;
pub mod error;

// Re-exports for convenience
pub use bootvol_oci::{BlobCache, ImageConfig, RegistryConfig};
pub use class::{ClassRegistry, Quantity, StorageClass};
pub use config::{load_config, validate_config, Config};
pub use error::{Error, Result};
pub use layer::{Compression, LayerDescriptor, ResolvedLayer, Role};
pub use populate::{populate, PopulateError, PopulateReport, Populator};
pub use rate::{Rate, RateReader};
pub use registry::{ImageHandle, LayerHandle, OciRegistry, Registry};
pub use resolver::{DuplicateRolePolicy, Image, ImageResolver};
pub use store::ContentStore;

/// Resolver wired to a real registry and the on-disk blob cache.
pub type OciResolver = ImageResolver<OciRegistry, BlobCache>;

/// Build an [`OciResolver`] from loaded configuration.
pub fn resolver_from_config(config: &Config) -> Result<OciResolver> {
    let registry_config = config.registry.to_registry_config()?;
    let registry = OciRegistry::new(registry_config).map_err(|e| {
        Error::Config(format!("failed to build registry client: {}", e))
    })?;
    let store = BlobCache::new(config.cache_dir.clone());
    Ok(ImageResolver::new(registry, store).with_duplicate_policy(config.duplicate_roles))
}

/// Populator configured from loaded configuration.
pub fn populator_from_config(config: &Config) -> Populator {
    Populator::new()
        .buffer_size(config.buffer_size)
        .sync(config.sync)
}
