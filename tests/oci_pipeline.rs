//! Resolve and populate against a mock OCI Distribution registry.
//!
//! ```bash
//! cargo test --test oci_pipeline
//! ```

use std::fs;

use bootvol::{
    BlobCache, Error, ImageResolver, OciRegistry, Populator, RegistryConfig, Role,
};
use bootvol_oci::{sha256_digest, OciError, Platform};
use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::json;

const MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
const INDEX: &str = "application/vnd.oci.image.index.v1+json";
const CONFIG: &str = "application/vnd.bootvol.config.v1+json";

struct Blob {
    media_type: &'static str,
    data: Vec<u8>,
}

impl Blob {
    fn new(media_type: &'static str, data: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type,
            data: data.into(),
        }
    }

    fn digest(&self) -> String {
        sha256_digest(&self.data)
    }

    fn descriptor(&self) -> serde_json::Value {
        json!({
            "mediaType": self.media_type,
            "digest": self.digest(),
            "size": self.data.len(),
        })
    }
}

fn config_blob() -> Blob {
    Blob::new(
        CONFIG,
        serde_json::to_vec(&json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": { "org.bootvol.cmdline": "console=ttyS0" } }
        }))
        .unwrap(),
    )
}

fn manifest_body(config: &Blob, layers: &[&Blob]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MANIFEST,
        "config": config.descriptor(),
        "layers": layers.iter().map(|l| l.descriptor()).collect::<Vec<_>>(),
    }))
    .unwrap()
}

fn serve_blob<'a>(server: &'a MockServer, blob: &Blob) -> Mock<'a> {
    let data = blob.data.clone();
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/v2/vols/os/blobs/{}", blob.digest()));
        then.status(200).body(data);
    })
}

fn serve_manifest<'a>(server: &'a MockServer, reference: &str, body: Vec<u8>) -> Mock<'a> {
    server.mock(|when, then| {
        when.method(GET)
            .path(format!("/v2/vols/os/manifests/{}", reference));
        then.status(200)
            .header("content-type", MANIFEST)
            .body(body);
    })
}

fn reference(server: &MockServer) -> String {
    format!("{}/vols/os:v1", server.address())
}

fn resolver_with(
    config: RegistryConfig,
) -> (tempfile::TempDir, ImageResolver<OciRegistry, BlobCache>) {
    let dir = tempfile::tempdir().unwrap();
    let registry = OciRegistry::new(config).unwrap();
    let store = BlobCache::new(dir.path().to_path_buf());
    (dir, ImageResolver::new(registry, store))
}

#[test]
fn resolves_and_populates_from_registry() {
    let server = MockServer::start();
    let config = config_blob();
    let kernel = Blob::new("application/vnd.bootvol.kernel.v1", b"bzImage".to_vec());
    let initrd = Blob::new("application/vnd.bootvol.initrd.v1", b"cpio archive".to_vec());
    let rootfs_raw: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
    let rootfs = Blob::new(
        "application/vnd.bootvol.rootfs.v1+zstd",
        zstd::encode_all(&rootfs_raw[..], 3).unwrap(),
    );

    let manifest = serve_manifest(
        &server,
        "v1",
        manifest_body(&config, &[&kernel, &initrd, &rootfs]),
    );
    let config_mock = serve_blob(&server, &config);
    let blobs = [
        serve_blob(&server, &kernel),
        serve_blob(&server, &initrd),
        serve_blob(&server, &rootfs),
    ];

    let (dir, resolver) = resolver_with(RegistryConfig::default());
    let image = resolver.resolve(&reference(&server)).unwrap();

    assert_eq!(image.config().label("org.bootvol.cmdline"), Some("console=ttyS0"));
    assert_eq!(image.kernel().digest(), kernel.digest());
    assert_eq!(fs::read(image.initrd().path()).unwrap(), initrd.data);
    assert_eq!(fs::read(image.rootfs().path()).unwrap(), rootfs.data);

    let dest = dir.path().join("rootfs.img");
    let report = Populator::new()
        .sync(false)
        .populate_device(image.rootfs(), &dest)
        .unwrap();
    assert_eq!(report.bytes, rootfs_raw.len() as u64);
    assert_eq!(fs::read(&dest).unwrap(), rootfs_raw);

    // A second resolution comes entirely from the local store.
    resolver.resolve(&reference(&server)).unwrap();
    manifest.assert_hits(2);
    config_mock.assert_hits(2);
    for blob in &blobs {
        blob.assert_hits(1);
    }
}

#[test]
fn incomplete_image_pulls_no_layers() {
    let server = MockServer::start();
    let config = config_blob();
    let kernel = Blob::new("application/vnd.bootvol.kernel.v1", b"bzImage".to_vec());
    let rootfs = Blob::new("application/vnd.bootvol.rootfs.v1", b"ext4".to_vec());

    serve_manifest(&server, "v1", manifest_body(&config, &[&kernel, &rootfs]));
    serve_blob(&server, &config);
    let kernel_mock = serve_blob(&server, &kernel);
    let rootfs_mock = serve_blob(&server, &rootfs);

    let (_dir, resolver) = resolver_with(RegistryConfig::default());
    match resolver.resolve(&reference(&server)) {
        Err(Error::IncompleteImage { missing, .. }) => assert_eq!(missing, vec![Role::Initrd]),
        other => panic!("unexpected result: {other:?}"),
    }
    kernel_mock.assert_hits(0);
    rootfs_mock.assert_hits(0);
}

#[test]
fn missing_manifest_is_a_resolve_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/v2/vols/os/manifests/v1");
        then.status(404);
    });

    let (_dir, resolver) = resolver_with(RegistryConfig::default());
    match resolver.resolve(&reference(&server)) {
        Err(Error::Resolve { source, .. }) => {
            assert!(matches!(source, OciError::NotFound(_)), "{source}")
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn index_is_resolved_to_the_configured_platform() {
    let server = MockServer::start();
    let config = config_blob();
    let kernel = Blob::new("application/vnd.bootvol.kernel.v1", b"Image.gz".to_vec());
    let initrd = Blob::new("application/vnd.bootvol.initrd.v1", b"cpio".to_vec());
    let rootfs = Blob::new("application/vnd.bootvol.rootfs.v1", b"erofs".to_vec());

    let arm_manifest = manifest_body(&config, &[&kernel, &initrd, &rootfs]);
    let arm_digest = sha256_digest(&arm_manifest);
    let index = serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": INDEX,
        "manifests": [
            {
                "mediaType": MANIFEST,
                "digest": sha256_digest(b"amd64 manifest"),
                "size": 14,
                "platform": { "architecture": "amd64", "os": "linux" }
            },
            {
                "mediaType": MANIFEST,
                "digest": arm_digest,
                "size": arm_manifest.len(),
                "platform": { "architecture": "arm64", "os": "linux" }
            }
        ]
    }))
    .unwrap();

    serve_manifest(&server, "v1", index);
    let by_digest = serve_manifest(&server, &arm_digest, arm_manifest);
    serve_blob(&server, &config);
    serve_blob(&server, &kernel);
    serve_blob(&server, &initrd);
    serve_blob(&server, &rootfs);

    let (_dir, resolver) = resolver_with(RegistryConfig {
        platform: Platform {
            architecture: "arm64".into(),
            os: "linux".into(),
            variant: None,
        },
        ..RegistryConfig::default()
    });
    let image = resolver.resolve(&reference(&server)).unwrap();
    assert_eq!(fs::read(image.kernel().path()).unwrap(), b"Image.gz");
    by_digest.assert();
}
