//! OCI manifest, index and config documents, plus the media types that mark
//! bootvol layers.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{OciError, Result};

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";

pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_BOOTVOL_CONFIG: &str = "application/vnd.bootvol.config.v1+json";
pub const MEDIA_TYPE_BOOTVOL_KERNEL: &str = "application/vnd.bootvol.kernel.v1";
pub const MEDIA_TYPE_BOOTVOL_INITRD: &str = "application/vnd.bootvol.initrd.v1";
pub const MEDIA_TYPE_BOOTVOL_ROOTFS: &str = "application/vnd.bootvol.rootfs.v1";

/// Media types accepted from a manifest endpoint, most specific first.
pub const MANIFEST_ACCEPT: [&str; 4] = [
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_DOCKER_MANIFEST,
];

/// Returns `true` when `media_type` is an image index / manifest list.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_INDEX || media_type == MEDIA_TYPE_DOCKER_MANIFEST_LIST
}

/// Pointer to a blob or manifest by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// A single-platform image manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

/// A multi-platform index (OCI index or Docker manifest list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndex {
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// First entry built for `target`.
    pub fn select_platform(&self, target: &Platform) -> Result<&Descriptor> {
        self.manifests
            .iter()
            .find(|d| d.platform.as_ref().is_some_and(|p| target.matches(p)))
            .ok_or_else(|| OciError::Manifest(format!("no manifest for platform {}", target)))
    }
}

/// Body of a manifest endpoint: either a concrete manifest or an index that
/// still has to be narrowed to one platform.
#[derive(Debug, Clone)]
pub enum ManifestDocument {
    Manifest(OciManifest),
    Index(ImageIndex),
}

impl ManifestDocument {
    /// Parse a manifest endpoint body.  The declared `mediaType` decides the
    /// shape; bodies without one are indexes when they list `manifests`.
    pub fn parse(body: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(body)?;
        let declared = raw.get("mediaType").and_then(|v| v.as_str()).unwrap_or("");
        let is_index = is_index_media_type(declared)
            || (declared.is_empty() && raw.get("manifests").is_some());

        let doc = if is_index {
            ManifestDocument::Index(serde_json::from_value(raw)?)
        } else {
            ManifestDocument::Manifest(serde_json::from_value(raw)?)
        };

        let version = match &doc {
            ManifestDocument::Manifest(m) => m.schema_version,
            ManifestDocument::Index(i) => i.schema_version,
        };
        if version != 2 {
            return Err(OciError::Manifest(format!(
                "unsupported schemaVersion {}",
                version
            )));
        }
        Ok(doc)
    }
}

/// Target platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// The platform this process runs on, in OCI naming.
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "powerpc64" => "ppc64le",
            other => other,
        };
        Self {
            architecture: architecture.to_string(),
            os: "linux".to_string(),
            variant: None,
        }
    }

    /// Whether `candidate` satisfies this target.  A target without a
    /// variant accepts any variant.
    pub fn matches(&self, candidate: &Platform) -> bool {
        self.os == candidate.os
            && self.architecture == candidate.architecture
            && (self.variant.is_none() || self.variant == candidate.variant)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Image config blob.  Volume images mostly use it for labels such as the
/// kernel command line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub config: Option<RuntimeConfig>,
}

impl ImageConfig {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.labels.get(key))
            .map(String::as_str)
    }
}

/// `config` section of the blob, in Docker's capitalized field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arm64() -> Platform {
        Platform {
            architecture: "arm64".into(),
            os: "linux".into(),
            variant: None,
        }
    }

    #[test]
    fn parses_volume_manifest() {
        let body = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.bootvol.config.v1+json",
                "digest": "sha256:aaaa",
                "size": 120
            },
            "layers": [
                { "mediaType": "application/vnd.bootvol.kernel.v1", "digest": "sha256:bbbb", "size": 5678 },
                {
                    "mediaType": "application/vnd.bootvol.rootfs.v1+zstd",
                    "digest": "sha256:cccc",
                    "size": 91011,
                    "annotations": { "org.opencontainers.image.title": "disk.img" }
                }
            ]
        }"#;

        let ManifestDocument::Manifest(m) = ManifestDocument::parse(body).unwrap() else {
            panic!("expected a manifest");
        };
        assert_eq!(m.config.media_type, MEDIA_TYPE_BOOTVOL_CONFIG);
        assert_eq!(m.layers[0].media_type, MEDIA_TYPE_BOOTVOL_KERNEL);
        assert_eq!(m.layers[1].size, 91011);
        assert_eq!(
            m.layers[1].annotations.get("org.opencontainers.image.title").map(String::as_str),
            Some("disk.img")
        );
    }

    #[test]
    fn untyped_body_with_manifests_is_an_index() {
        let body = br#"{
            "schemaVersion": 2,
            "manifests": [
                {
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": "sha256:x86",
                    "size": 100,
                    "platform": { "architecture": "amd64", "os": "linux" }
                },
                {
                    "mediaType": "application/vnd.oci.image.manifest.v1+json",
                    "digest": "sha256:arm",
                    "size": 200,
                    "platform": { "architecture": "arm64", "os": "linux", "variant": "v8" }
                }
            ]
        }"#;

        let ManifestDocument::Index(index) = ManifestDocument::parse(body).unwrap() else {
            panic!("expected an index");
        };
        assert_eq!(index.select_platform(&arm64()).unwrap().digest, "sha256:arm");

        let s390x = Platform {
            architecture: "s390x".into(),
            ..arm64()
        };
        let err = index.select_platform(&s390x).unwrap_err();
        assert!(err.to_string().contains("linux/s390x"), "{err}");
    }

    #[test]
    fn rejects_schema_version_one() {
        let body = br#"{"schemaVersion": 1, "config": {"mediaType": "x", "digest": "sha256:a", "size": 1}}"#;
        assert!(matches!(
            ManifestDocument::parse(body),
            Err(OciError::Manifest(_))
        ));
    }

    #[test]
    fn variant_only_constrains_when_set() {
        let v8 = Platform {
            variant: Some("v8".into()),
            ..arm64()
        };
        assert!(arm64().matches(&v8));
        assert!(v8.matches(&v8));
        assert!(!v8.matches(&arm64()));
        assert_eq!(v8.to_string(), "linux/arm64/v8");
    }

    #[test]
    fn config_labels() {
        let raw = r#"{
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": { "org.bootvol.cmdline": "console=ttyS0" } }
        }"#;
        let cfg: ImageConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.label("org.bootvol.cmdline"), Some("console=ttyS0"));
        assert_eq!(cfg.label("missing"), None);
    }
}
