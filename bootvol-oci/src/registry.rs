//! Blocking OCI Distribution client.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::auth::{Challenge, Credentials};
use crate::cache::{hex_encode, BlobCache};
use crate::error::{OciError, Result};
use crate::manifest::{
    ImageConfig, ManifestDocument, OciManifest, Platform, MANIFEST_ACCEPT,
    MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_MANIFEST,
};
use crate::reference::ImageRef;

/// Everything the registry client needs, passed in explicitly.
#[derive(Debug)]
pub struct RegistryConfig {
    pub user_agent: String,
    pub connect_timeout: Duration,
    /// Whole-request timeout.  `None` lets multi-gigabyte blobs stream for
    /// as long as they need.
    pub timeout: Option<Duration>,
    /// Hosts (`host[:port]`) reached over plain HTTP.
    pub insecure: Vec<String>,
    pub credentials: Option<Credentials>,
    /// Platform picked out of multi-platform indexes.
    pub platform: Platform,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("bootvol-oci/", env!("CARGO_PKG_VERSION")).to_string(),
            connect_timeout: Duration::from_secs(30),
            timeout: None,
            insecure: Vec::new(),
            credentials: None,
            platform: Platform::host(),
        }
    }
}

impl RegistryConfig {
    /// Loopback registries and those listed as insecure speak plain HTTP.
    fn scheme(&self, registry: &str) -> &'static str {
        let host = match registry.rsplit_once(':') {
            Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
            _ => registry,
        };
        let loopback = matches!(host, "localhost" | "127.0.0.1" | "[::1]");
        if loopback || self.insecure.iter().any(|h| h == registry) {
            "http"
        } else {
            "https"
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// OCI Distribution client over blocking HTTP.
pub struct RegistryClient {
    http: Client,
    config: RegistryConfig,
}

impl RegistryClient {
    pub fn new(config: RegistryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Fetch whatever the manifest endpoint serves for `image_ref`.
    pub fn fetch_manifest(&self, image_ref: &ImageRef) -> Result<ManifestDocument> {
        let url = self.endpoint(image_ref, "manifests", &image_ref.reference);
        let body = self
            .get(&url, image_ref, Some(&MANIFEST_ACCEPT.join(", ")))?
            .bytes()?;
        if image_ref.is_digest() {
            verify_digest(&image_ref.reference, &body)?;
        }
        ManifestDocument::parse(&body)
    }

    /// Fetch a platform manifest an index points at, checking its digest.
    pub fn fetch_manifest_by_digest(
        &self,
        image_ref: &ImageRef,
        digest: &str,
    ) -> Result<OciManifest> {
        let url = self.endpoint(image_ref, "manifests", digest);
        let accept = [MEDIA_TYPE_OCI_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST].join(", ");
        let body = self.get(&url, image_ref, Some(&accept))?.bytes()?;
        verify_digest(digest, &body)?;
        match ManifestDocument::parse(&body)? {
            ManifestDocument::Manifest(manifest) => Ok(manifest),
            ManifestDocument::Index(_) => Err(OciError::Manifest(format!(
                "{} points at a nested index",
                digest
            ))),
        }
    }

    /// Resolve `image_ref` to a single manifest for the configured platform.
    pub fn resolve_manifest(&self, image_ref: &ImageRef) -> Result<OciManifest> {
        let index = match self.fetch_manifest(image_ref)? {
            ManifestDocument::Manifest(manifest) => return Ok(manifest),
            ManifestDocument::Index(index) => index,
        };
        let platform = &self.config.platform;
        let entry = index.select_platform(platform)?;
        info!(image = %image_ref, %platform, digest = %entry.digest, "selected platform manifest");
        self.fetch_manifest_by_digest(image_ref, &entry.digest)
    }

    /// Download and parse the config blob.  Config blobs are small, so they
    /// are read whole and checked in memory.
    pub fn fetch_config(&self, image_ref: &ImageRef, digest: &str) -> Result<ImageConfig> {
        let body = self.open_blob(image_ref, digest)?.bytes()?;
        verify_digest(digest, &body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Start a streaming blob download.  The response implements
    /// [`std::io::Read`] and is never buffered whole.
    pub fn open_blob(&self, image_ref: &ImageRef, digest: &str) -> Result<Response> {
        let url = self.endpoint(image_ref, "blobs", digest);
        debug!(%url, "opening blob");
        self.get(&url, image_ref, None)
    }

    fn endpoint(&self, image_ref: &ImageRef, kind: &str, reference: &str) -> String {
        format!(
            "{}://{}/v2/{}/{}/{}",
            self.config.scheme(&image_ref.registry),
            image_ref.registry,
            image_ref.repository,
            kind,
            reference,
        )
    }

    fn request(&self, url: &str, accept: Option<&str>) -> RequestBuilder {
        let req = self.http.get(url);
        match accept {
            Some(accept) => req.header(ACCEPT, accept),
            None => req,
        }
    }

    /// GET with the registry auth dance: try with whatever static token is
    /// configured, and on 401 answer the challenge once.
    fn get(&self, url: &str, image_ref: &ImageRef, accept: Option<&str>) -> Result<Response> {
        let mut first = self.request(url, accept);
        if let Some(Credentials::Bearer(token)) = &self.config.credentials {
            first = first.bearer_auth(token.expose_secret());
        }
        let resp = first.send()?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return check_status(url, resp);
        }

        let header = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_default();
        drop(resp);

        let retry = self.request(url, accept);
        let retry = match (Challenge::parse(&header), &self.config.credentials) {
            (Some(Challenge::Basic), Some(Credentials::Basic { username, password })) => {
                retry.basic_auth(username, Some(password.expose_secret()))
            }
            (Some(Challenge::Basic), _) => {
                return Err(OciError::Registry(format!(
                    "GET {} requires basic credentials",
                    url
                )))
            }
            (Some(Challenge::Bearer { realm, service, scope }), _) => {
                let scope =
                    scope.unwrap_or_else(|| format!("repository:{}:pull", image_ref.repository));
                retry.bearer_auth(self.fetch_token(&realm, service.as_deref(), &scope)?)
            }
            (None, _) => {
                return Err(OciError::Registry(format!(
                    "GET {} returned 401 with an unusable challenge '{}'",
                    url, header
                )))
            }
        };
        check_status(url, retry.send()?)
    }

    fn fetch_token(&self, realm: &str, service: Option<&str>, scope: &str) -> Result<String> {
        debug!(realm, service, scope, "fetching bearer token");
        let mut req = self.http.get(realm).query(&[("scope", scope)]);
        if let Some(service) = service {
            req = req.query(&[("service", service)]);
        }
        if let Some(Credentials::Basic { username, password }) = &self.config.credentials {
            req = req.basic_auth(username, Some(password.expose_secret()));
        }

        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(OciError::Registry(format!(
                "token endpoint {} returned {}: {}",
                realm, status, body
            )));
        }
        let body: TokenResponse = resp.json()?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| OciError::Registry(format!("token endpoint {} sent no token", realm)))
    }
}

fn check_status(url: &str, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(OciError::NotFound(url.to_string()));
    }
    let body = resp.text().unwrap_or_default();
    Err(OciError::Registry(format!(
        "GET {} returned {}: {}",
        url, status, body
    )))
}

fn verify_digest(digest: &str, data: &[u8]) -> Result<()> {
    let expected = BlobCache::hex_from_digest(digest)?;
    let actual = hex_encode(&Sha256::digest(data));
    if actual != expected {
        return Err(OciError::DigestMismatch {
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}
