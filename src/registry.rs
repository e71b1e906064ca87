//! Registry client seam.
//!
//! The resolver only needs three capabilities from a registry: turn a
//! reference into an image handle, list that image's layers in order, and
//! open a layer's content as a byte stream.  [`OciRegistry`] provides them
//! over the OCI Distribution API; tests provide them in memory.

use std::io::Read;
use std::sync::Arc;

use bootvol_oci::{ImageConfig, ImageRef, OciManifest, RegistryClient, RegistryConfig};
use tracing::debug;

use crate::layer::LayerDescriptor;

/// Resolves image references.
pub trait Registry {
    type Image: ImageHandle;

    fn resolve(&self, reference: &str) -> bootvol_oci::Result<Self::Image>;
}

/// A resolved image: its config value and its ordered layers.
pub trait ImageHandle {
    type Layer: LayerHandle;

    fn config(&self) -> bootvol_oci::Result<ImageConfig>;

    /// Layers in manifest order.
    fn layers(&self) -> bootvol_oci::Result<Vec<Self::Layer>>;
}

/// One layer of a resolved image.
pub trait LayerHandle {
    fn descriptor(&self) -> &LayerDescriptor;

    /// Open the layer's bytes.  The caller owns and drops the stream.
    fn open_content(&self) -> bootvol_oci::Result<Box<dyn Read + Send + '_>>;
}

// ---------------------------------------------------------------------------
// OCI Distribution implementation
// ---------------------------------------------------------------------------

/// [`Registry`] backed by a blocking OCI Distribution client.
#[derive(Clone)]
pub struct OciRegistry {
    client: Arc<RegistryClient>,
}

impl OciRegistry {
    pub fn new(config: RegistryConfig) -> bootvol_oci::Result<Self> {
        Ok(Self {
            client: Arc::new(RegistryClient::new(config)?),
        })
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }
}

impl Registry for OciRegistry {
    type Image = OciImage;

    fn resolve(&self, reference: &str) -> bootvol_oci::Result<OciImage> {
        let image_ref = ImageRef::parse(reference)?;
        let manifest = self.client.resolve_manifest(&image_ref)?;
        debug!(
            image = %image_ref,
            layers = manifest.layers.len(),
            "resolved manifest",
        );
        Ok(OciImage {
            client: Arc::clone(&self.client),
            image_ref,
            manifest,
        })
    }
}

/// An image manifest fetched from an OCI registry.
pub struct OciImage {
    client: Arc<RegistryClient>,
    image_ref: ImageRef,
    manifest: OciManifest,
}

impl OciImage {
    pub fn image_ref(&self) -> &ImageRef {
        &self.image_ref
    }

    pub fn manifest(&self) -> &OciManifest {
        &self.manifest
    }
}

impl ImageHandle for OciImage {
    type Layer = OciLayer;

    fn config(&self) -> bootvol_oci::Result<ImageConfig> {
        self.client
            .fetch_config(&self.image_ref, &self.manifest.config.digest)
    }

    fn layers(&self) -> bootvol_oci::Result<Vec<OciLayer>> {
        Ok(self
            .manifest
            .layers
            .iter()
            .map(|desc| OciLayer {
                client: Arc::clone(&self.client),
                image_ref: self.image_ref.clone(),
                descriptor: LayerDescriptor::new(
                    desc.digest.clone(),
                    desc.media_type.clone(),
                    desc.size,
                ),
            })
            .collect())
    }
}

/// A single blob of an [`OciImage`].
pub struct OciLayer {
    client: Arc<RegistryClient>,
    image_ref: ImageRef,
    descriptor: LayerDescriptor,
}

impl LayerHandle for OciLayer {
    fn descriptor(&self) -> &LayerDescriptor {
        &self.descriptor
    }

    fn open_content(&self) -> bootvol_oci::Result<Box<dyn Read + Send + '_>> {
        let body = self
            .client
            .open_blob(&self.image_ref, &self.descriptor.digest)?;
        Ok(Box::new(body))
    }
}
