//! Image resolution: registry layers in, validated [`Image`] out.

use std::collections::BTreeMap;
use std::path::PathBuf;

use bootvol_oci::ImageConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layer::{LayerDescriptor, ResolvedLayer, Role};
use crate::registry::{ImageHandle, LayerHandle, Registry};
use crate::store::ContentStore;

/// What to do when more than one layer claims the same payload role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateRolePolicy {
    /// The first layer in manifest order wins; later ones are ignored.
    #[default]
    FirstWins,
    /// Fail the resolution.
    Reject,
}

/// A complete, bootable image whose payload layers are all local.
///
/// Only [`ImageResolver::resolve`] builds one, and only after kernel, initrd
/// and rootfs are all present.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    reference: String,
    config: ImageConfig,
    kernel: ResolvedLayer,
    initrd: ResolvedLayer,
    rootfs: ResolvedLayer,
}

impl Image {
    /// Assemble an image from the layers found for each role, naming every
    /// required role that is absent or has no local path.
    fn assemble(
        reference: &str,
        config: ImageConfig,
        mut found: BTreeMap<Role, ResolvedLayer>,
    ) -> Result<Self> {
        let mut take = |role: Role| {
            found
                .remove(&role)
                .filter(|layer| !layer.path.as_os_str().is_empty())
        };
        match (take(Role::Kernel), take(Role::Initrd), take(Role::RootFs)) {
            (Some(kernel), Some(initrd), Some(rootfs)) => Ok(Self {
                reference: reference.to_string(),
                config,
                kernel,
                initrd,
                rootfs,
            }),
            (kernel, initrd, rootfs) => {
                let missing = [
                    (Role::Kernel, kernel.is_none()),
                    (Role::Initrd, initrd.is_none()),
                    (Role::RootFs, rootfs.is_none()),
                ]
                .into_iter()
                .filter_map(|(role, absent)| absent.then_some(role))
                .collect();
                Err(Error::IncompleteImage {
                    reference: reference.to_string(),
                    missing,
                })
            }
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub fn kernel(&self) -> &ResolvedLayer {
        &self.kernel
    }

    pub fn initrd(&self) -> &ResolvedLayer {
        &self.initrd
    }

    pub fn rootfs(&self) -> &ResolvedLayer {
        &self.rootfs
    }

    /// Layer for a payload role; `None` for config and unrecognized roles.
    pub fn layer(&self, role: Role) -> Option<&ResolvedLayer> {
        match role {
            Role::Kernel => Some(&self.kernel),
            Role::Initrd => Some(&self.initrd),
            Role::RootFs => Some(&self.rootfs),
            Role::Config | Role::Unrecognized => None,
        }
    }

    /// Payload layers in boot order.
    pub fn layers(&self) -> [&ResolvedLayer; 3] {
        [&self.kernel, &self.initrd, &self.rootfs]
    }
}

/// Pulls an image's payload layers into a local store and validates them.
pub struct ImageResolver<R, S> {
    registry: R,
    store: S,
    duplicates: DuplicateRolePolicy,
}

impl<R: Registry, S: ContentStore> ImageResolver<R, S> {
    pub fn new(registry: R, store: S) -> Self {
        Self {
            registry,
            store,
            duplicates: DuplicateRolePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicateRolePolicy) -> Self {
        self.duplicates = policy;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Resolve `reference` into a complete [`Image`].
    ///
    /// Layers are classified and checked for completeness before any payload
    /// is pulled, so an incomplete image fails without transferring content.
    pub fn resolve(&self, reference: &str) -> Result<Image> {
        info!(reference, "resolving image");
        let resolve_err = |source| Error::Resolve {
            reference: reference.to_string(),
            source,
        };

        let handle = self.registry.resolve(reference).map_err(resolve_err)?;
        let config = handle.config().map_err(resolve_err)?;
        let layers = handle.layers().map_err(resolve_err)?;
        if layers.is_empty() {
            warn!(reference, "image lists no layers");
        }

        let selected = self.select(reference, &layers)?;
        let missing: Vec<Role> = Role::REQUIRED
            .into_iter()
            .filter(|role| !selected.contains_key(role))
            .collect();
        if !missing.is_empty() {
            return Err(Error::IncompleteImage {
                reference: reference.to_string(),
                missing,
            });
        }

        let mut found = BTreeMap::new();
        for (role, layer) in selected {
            let path = self.localize(reference, layer)?;
            found.insert(
                role,
                ResolvedLayer {
                    descriptor: layer.descriptor().clone(),
                    path,
                },
            );
        }

        let image = Image::assemble(reference, config, found)?;
        info!(
            reference,
            kernel = %image.kernel.digest(),
            initrd = %image.initrd.digest(),
            rootfs = %image.rootfs.digest(),
            "image resolved",
        );
        Ok(image)
    }

    /// Pick one layer per payload role according to the duplicate policy.
    fn select<'a, L: LayerHandle>(
        &self,
        reference: &str,
        layers: &'a [L],
    ) -> Result<BTreeMap<Role, &'a L>> {
        let mut selected: BTreeMap<Role, &'a L> = BTreeMap::new();
        for layer in layers {
            let desc = layer.descriptor();
            if !desc.role.is_payload() {
                debug!(
                    reference,
                    digest = %desc.digest,
                    media_type = %desc.media_type,
                    role = %desc.role,
                    "skipping non-payload layer",
                );
                continue;
            }

            match selected.get(&desc.role) {
                None => {
                    selected.insert(desc.role, layer);
                }
                Some(first) => {
                    let first = &first.descriptor().digest;
                    match self.duplicates {
                        DuplicateRolePolicy::FirstWins => warn!(
                            reference,
                            role = %desc.role,
                            kept = %first,
                            ignored = %desc.digest,
                            "duplicate layer role; keeping the first",
                        ),
                        DuplicateRolePolicy::Reject => {
                            return Err(Error::DuplicateRole {
                                reference: reference.to_string(),
                                role: desc.role,
                                first: first.clone(),
                                second: desc.digest.clone(),
                            })
                        }
                    }
                }
            }
        }
        Ok(selected)
    }

    fn localize<L: LayerHandle>(&self, reference: &str, layer: &L) -> Result<PathBuf> {
        let desc: &LayerDescriptor = layer.descriptor();
        let localize_err = |source| Error::Localize {
            reference: reference.to_string(),
            role: desc.role,
            digest: desc.digest.clone(),
            source,
        };

        if self.store.contains(&desc.digest) {
            debug!(role = %desc.role, digest = %desc.digest, "layer already local");
            return self.store.path_for(&desc.digest).map_err(localize_err);
        }

        debug!(role = %desc.role, digest = %desc.digest, size = desc.size, "localizing layer");
        let mut content = layer.open_content().map_err(localize_err)?;
        self.store
            .localize(&desc.digest, &mut content)
            .map_err(localize_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(role_media: &str, path: &str) -> ResolvedLayer {
        ResolvedLayer {
            descriptor: LayerDescriptor::new("sha256:00", role_media, 1),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn assemble_treats_empty_paths_as_missing() {
        let mut found = BTreeMap::new();
        found.insert(Role::Kernel, resolved("application/vnd.bootvol.kernel.v1", "/k"));
        found.insert(Role::Initrd, resolved("application/vnd.bootvol.initrd.v1", ""));

        let err = Image::assemble("os:v1", ImageConfig::default(), found).unwrap_err();
        match err {
            Error::IncompleteImage { missing, .. } => {
                assert_eq!(missing, vec![Role::Initrd, Role::RootFs])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn layer_lookup_by_role() {
        let mut found = BTreeMap::new();
        found.insert(Role::Kernel, resolved("application/vnd.bootvol.kernel.v1", "/k"));
        found.insert(Role::Initrd, resolved("application/vnd.bootvol.initrd.v1", "/i"));
        found.insert(Role::RootFs, resolved("application/vnd.bootvol.rootfs.v1", "/r"));

        let image = Image::assemble("os:v1", ImageConfig::default(), found).unwrap();
        assert_eq!(image.layer(Role::RootFs).unwrap().path, PathBuf::from("/r"));
        assert!(image.layer(Role::Config).is_none());
        assert_eq!(image.layers().map(|l| l.role()), Role::REQUIRED);
    }
}
