//! Layer roles and descriptors.
//!
//! A volume image is an ordinary OCI manifest whose layers carry bootvol
//! media types.  The media type is the only thing that tells a kernel from
//! an initrd from a root filesystem, so classification lives here and
//! nowhere else.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use bootvol_oci::manifest::{
    MEDIA_TYPE_BOOTVOL_CONFIG, MEDIA_TYPE_BOOTVOL_INITRD, MEDIA_TYPE_BOOTVOL_KERNEL,
    MEDIA_TYPE_BOOTVOL_ROOTFS, MEDIA_TYPE_OCI_CONFIG,
};
use serde::{Deserialize, Serialize};

/// What a layer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Config,
    Kernel,
    Initrd,
    RootFs,
    Unrecognized,
}

impl Role {
    /// Roles every bootable image must provide.
    pub const REQUIRED: [Role; 3] = [Role::Kernel, Role::Initrd, Role::RootFs];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Config => "config",
            Role::Kernel => "kernel",
            Role::Initrd => "initrd",
            Role::RootFs => "rootfs",
            Role::Unrecognized => "unrecognized",
        }
    }

    /// Whether the role carries a payload that can be localized and populated.
    pub fn is_payload(self) -> bool {
        matches!(self, Role::Kernel | Role::Initrd | Role::RootFs)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kernel" => Ok(Role::Kernel),
            "initrd" | "initramfs" => Ok(Role::Initrd),
            "rootfs" => Ok(Role::RootFs),
            "config" => Ok(Role::Config),
            other => Err(format!(
                "unknown role '{}', expected kernel, initrd or rootfs",
                other
            )),
        }
    }
}

/// Transport compression of a payload layer, taken from the media type suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
    Zstd,
}

/// Classify a layer media type into a role and its compression.
///
/// Payload media types may carry a `+gzip` or `+zstd` suffix; any other
/// suffix makes the layer unrecognized rather than guessing.
pub fn classify(media_type: &str) -> (Role, Compression) {
    if media_type == MEDIA_TYPE_OCI_CONFIG || media_type == MEDIA_TYPE_BOOTVOL_CONFIG {
        return (Role::Config, Compression::None);
    }

    let (base, compression) = match media_type.split_once('+') {
        None => (media_type, Compression::None),
        Some((base, "gzip")) => (base, Compression::Gzip),
        Some((base, "zstd")) => (base, Compression::Zstd),
        Some(_) => return (Role::Unrecognized, Compression::None),
    };

    let role = match base {
        MEDIA_TYPE_BOOTVOL_KERNEL => Role::Kernel,
        MEDIA_TYPE_BOOTVOL_INITRD => Role::Initrd,
        MEDIA_TYPE_BOOTVOL_ROOTFS => Role::RootFs,
        _ => return (Role::Unrecognized, Compression::None),
    };
    (role, compression)
}

/// Immutable description of one layer as the registry reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDescriptor {
    pub digest: String,
    pub media_type: String,
    pub role: Role,
    pub compression: Compression,
    /// Size of the stored (possibly compressed) blob in bytes.
    pub size: u64,
}

impl LayerDescriptor {
    pub fn new(digest: impl Into<String>, media_type: impl Into<String>, size: u64) -> Self {
        let media_type = media_type.into();
        let (role, compression) = classify(&media_type);
        Self {
            digest: digest.into(),
            media_type,
            role,
            compression,
            size,
        }
    }
}

/// A layer whose bytes are present in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedLayer {
    pub descriptor: LayerDescriptor,
    pub path: PathBuf,
}

impl ResolvedLayer {
    pub fn role(&self) -> Role {
        self.descriptor.role
    }

    pub fn digest(&self) -> &str {
        &self.descriptor.digest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
