//! Error type shared by the registry client and the blob cache.

#[derive(Debug, thiserror::Error)]
pub enum OciError {
    /// The registry answered, but not with something the client can use
    /// (unexpected status, unanswerable auth challenge, bad token response).
    #[error("registry: {0}")]
    Registry(String),

    #[error("bad manifest: {0}")]
    Manifest(String),

    #[error("'{0}' is not a valid image reference")]
    InvalidReference(String),

    #[error("'{0}' is not a sha256 digest")]
    InvalidDigest(String),

    #[error("content does not match {expected} (computed {actual})")]
    DigestMismatch { expected: String, actual: String },

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),
}

pub type Result<T, E = OciError> = std::result::Result<T, E>;
