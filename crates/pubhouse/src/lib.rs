//! Pubhouse is the core of a private package registry: it validates uploaded
//! package archives and understands their manifests and versions.
//!
//! Nothing in this crate performs I/O beyond reading the byte buffer it is given,
//! so it is safe to run against untrusted uploads.

pub mod archive;
pub mod error;
pub mod manifest;
pub mod version;

// Re-export core types
pub use archive::{ValidatedArchive, validate_archive};
pub use error::{ArchiveError, Result};
pub use manifest::{MANIFEST_FILE, Manifest, is_valid_package_name, manifest_to_json};
pub use version::{max_by_version, parse_version, sort_by_version_desc};

pub use semver::Version;

