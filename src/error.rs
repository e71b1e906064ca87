//! Error types for bootvol

use std::path::PathBuf;

use bootvol_oci::OciError;
use thiserror::Error;

use crate::layer::Role;
use crate::populate::PopulateError;

/// Result type alias using bootvol Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving or populating a volume image
#[derive(Error, Debug)]
pub enum Error {
    /// Reference unresolvable, registry unreachable, or manifest/config unavailable
    #[error("failed to resolve image '{reference}': {source}")]
    Resolve {
        reference: String,
        #[source]
        source: OciError,
    },

    /// One or more required roles are absent
    #[error("image '{reference}' is incomplete: missing {}", join_roles(.missing))]
    IncompleteImage {
        reference: String,
        missing: Vec<Role>,
    },

    /// Two layers claim the same role and duplicates are rejected
    #[error("image '{reference}' has more than one {role} layer ({first} and {second})")]
    DuplicateRole {
        reference: String,
        role: Role,
        first: String,
        second: String,
    },

    /// Layer content could not be materialized in the local store
    #[error("failed to localize {role} layer {digest} of '{reference}': {source}")]
    Localize {
        reference: String,
        role: Role,
        digest: String,
        #[source]
        source: OciError,
    },

    /// The requested role is not part of the resolved image
    #[error("image '{reference}' has no {role} layer to populate")]
    RoleUnavailable { reference: String, role: Role },

    /// A layer source or destination could not be opened
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Copying a layer into its destination failed part-way
    #[error("failed to populate {dest} with {role} layer {digest}: {source}")]
    Populate {
        dest: String,
        role: Role,
        digest: String,
        #[source]
        source: PopulateError,
    },

    /// Block device smaller than the payload
    #[error("destination {} holds {capacity} bytes but the {role} layer needs {required}", .dest.display())]
    DestinationTooSmall {
        dest: PathBuf,
        role: Role,
        capacity: u64,
        required: u64,
    },

    /// Staged copy could not be moved over its destination
    #[error("failed to stage {}: {source}", .dest.display())]
    Stage {
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Atomic staging asked to replace something that is not a regular file
    #[error("{} is not a regular file and cannot be replaced atomically", .dest.display())]
    NotRegularFile { dest: PathBuf },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
