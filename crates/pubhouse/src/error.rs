//! Error types for the pubhouse core library
//!
//! Every way an uploaded archive can be rejected is a variant of [`ArchiveError`].
//! All of them are client errors: the upload is never partially accepted.

use thiserror::Error;

/// Errors raised while validating an uploaded package archive
///
/// Variants carry enough context to be shown to the uploading client as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    /// The bytes are not a gzip-compressed tar stream, or an entry is unreadable
    #[error("Malformed archive: {reason}")]
    MalformedArchive { reason: String },

    /// No manifest at the archive root or one directory deep
    #[error("Archive does not contain a {file} at its root or inside a single top-level directory", file = crate::manifest::MANIFEST_FILE)]
    ManifestMissing,

    /// The manifest exists but cannot be used
    #[error("Invalid manifest: {reason}")]
    ManifestInvalid { reason: String },

    /// The package name violates `^[a-z][a-z0-9_]*$`
    #[error("Invalid package name `{name}`: must start with a lowercase letter and contain only lowercase letters, digits and underscores")]
    InvalidName { name: String },

    /// The version string is not a semantic version
    #[error("Invalid version `{version}`: {reason}")]
    InvalidVersion { version: String, reason: String },
}

impl ArchiveError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedArchive {
            reason: reason.into(),
        }
    }

    pub(crate) fn manifest_invalid(reason: impl Into<String>) -> Self {
        Self::ManifestInvalid {
            reason: reason.into(),
        }
    }
}

/// Result type for archive validation
pub type Result<T> = std::result::Result<T, ArchiveError>;
