use std::fmt;
use std::str::FromStr;

use crate::error::{OciError, Result};

pub(crate) const DOCKER_HUB: &str = "registry-1.docker.io";

/// `registry/repository` plus a tag or digest.
///
/// Accepted forms: `os`, `os:v1`, `acme/os:v1`, `ghcr.io/acme/os:v1`,
/// `localhost:5000/os:v1` and `ghcr.io/acme/os@sha256:<hex>`.  Names without a
/// registry host resolve against Docker Hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    /// Tag, or `sha256:<hex>` for digest references.
    pub reference: String,
}

impl ImageRef {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = || OciError::InvalidReference(raw.to_string());

        // `name:tag@digest` pins the digest; the tag is informational only.
        let (name, reference) = match raw.split_once('@') {
            Some((name, digest)) => (split_tag(name).0, digest),
            None => {
                let (name, tag) = split_tag(raw);
                (name, tag.unwrap_or("latest"))
            }
        };
        if name.is_empty() || reference.is_empty() {
            return Err(invalid());
        }

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if is_registry_host(host) => (host, rest),
            _ => (DOCKER_HUB, name),
        };
        let registry = match registry {
            "docker.io" | "index.docker.io" => DOCKER_HUB,
            other => other,
        };
        let repository = if registry == DOCKER_HUB && !repository.contains('/') {
            format!("library/{}", repository)
        } else {
            repository.to_string()
        };

        let well_formed = repository
            .split('/')
            .all(|part| !part.is_empty() && !part.bytes().any(|b| b.is_ascii_uppercase()));
        if !well_formed {
            return Err(invalid());
        }

        Ok(Self {
            registry: registry.to_string(),
            repository,
            reference: reference.to_string(),
        })
    }

    /// Whether the reference pins a digest rather than a tag.
    pub fn is_digest(&self) -> bool {
        self.reference.contains(':')
    }
}

/// Only a colon in the last path component separates a tag; earlier ones
/// belong to a registry port.
fn split_tag(name: &str) -> (&str, Option<&str>) {
    let last = name.rfind('/').map_or(0, |i| i + 1);
    match name[last..].rfind(':') {
        Some(i) => (&name[..last + i], Some(&name[last + i + 1..])),
        None => (name, None),
    }
}

fn is_registry_host(component: &str) -> bool {
    component == "localhost" || component.contains('.') || component.contains(':')
}

impl FromStr for ImageRef {
    type Err = OciError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.is_digest() { '@' } else { ':' };
        write!(f, "{}/{}{}{}", self.registry, self.repository, sep, self.reference)
    }
}
