//! Error types for the guard core.

use thiserror::Error;

/// The main error type for guard operations.
///
/// Permission checks and input validation never surface these to callers;
/// they fail closed with a decision or a boolean. Audit logging and the
/// sensitive-data transform do.
#[derive(Error, Debug)]
pub enum Error {
    /// Role with the given name already exists.
    #[error("Role '{0}' already exists")]
    RoleAlreadyExists(String),

    /// Role with the given name was not found.
    #[error("Role '{0}' not found")]
    RoleNotFound(String),

    /// Actor with the given ID was not found.
    #[error("Actor '{0}' not found")]
    ActorNotFound(String),

    /// The identity directory failed to answer a lookup.
    #[error("Actor directory failure: {0}")]
    Directory(String),

    /// Circular inheritance detected between role definitions.
    #[error("Circular inheritance detected in role definitions involving '{0}'")]
    CircularInheritance(String),

    /// Maximum role inheritance depth exceeded.
    #[error("Maximum role inheritance depth exceeded (max: {0})")]
    MaxDepthExceeded(usize),

    /// Invalid permission format.
    #[error("Invalid permission format: {0}")]
    InvalidPermission(String),

    /// An audit record could not be stored.
    #[error("Audit logging failed: {0}")]
    AuditFailure(String),

    /// The sensitive-data transform rejected its input.
    #[error("Sensitive data transform failed: {0}")]
    Transform(String),

    /// An export format name was not recognised.
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type alias for guard operations.
pub type Result<T> = std::result::Result<T, Error>;
