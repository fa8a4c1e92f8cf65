//! Error types for the pubhouse registry

use pubhouse::ArchiveError;
use thiserror::Error;

use crate::storage::blob_storage::StorageError;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error(transparent)]
    InvalidArchive(#[from] ArchiveError),

    #[error("Invalid version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Package already exists: {0}")]
    PackageExists(String),

    #[error("Version {version} not found for package {package}")]
    VersionNotFound { package: String, version: String },

    #[error("Version {version} of package {package} already exists")]
    VersionExists { package: String, version: String },

    #[error("Package {0} has no versions")]
    NoVersions(String),

    #[error("User {user} is not an uploader of package {package}")]
    UploaderNotFound { package: String, user: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("Blob error: {0}")]
    Blob(#[from] StorageError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Coarse classification of a [`RegistryError`], used to pick a response status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    Conflict,
    NotFound,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case code, e.g. `not_found`
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RegistryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::InvalidArchive(_)
            | RegistryError::InvalidVersion { .. }
            | RegistryError::BadRequest(_) => ErrorKind::BadRequest,
            RegistryError::Forbidden(_) => ErrorKind::Forbidden,
            RegistryError::PackageExists(_)
            | RegistryError::VersionExists { .. }
            | RegistryError::UserExists(_)
            | RegistryError::Blob(StorageError::AlreadyExists(_)) => ErrorKind::Conflict,
            RegistryError::PackageNotFound(_)
            | RegistryError::VersionNotFound { .. }
            | RegistryError::NoVersions(_)
            | RegistryError::UploaderNotFound { .. }
            | RegistryError::UserNotFound(_)
            | RegistryError::Blob(StorageError::NotFound(_)) => ErrorKind::NotFound,
            RegistryError::Blob(_)
            | RegistryError::Storage(_)
            | RegistryError::Serialization(_)
            | RegistryError::Task(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
