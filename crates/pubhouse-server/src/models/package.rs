//! Package and version API models

use pubhouse::manifest_to_json;
use pubhouse_registry::{PackageDetails, PackageSummary, User, Version};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

/// One published version
#[derive(Debug, Serialize)]
pub struct VersionEntry {
    pub version: String,
    /// Manifest rendered as JSON
    pub pubspec: serde_json::Value,
    pub archive_url: String,
    pub archive_sha256: String,
    #[serde(with = "time::serde::rfc3339")]
    pub published: OffsetDateTime,
    pub retracted: bool,
}

impl From<Version> for VersionEntry {
    fn from(v: Version) -> Self {
        // Stored manifests were validated at publish time
        let pubspec = manifest_to_json(&v.manifest).unwrap_or_else(|e| {
            warn!(version = %v.version, error = %e, "stored manifest is not valid JSON-compatible YAML");
            serde_json::Value::Null
        });

        Self {
            version: v.version,
            pubspec,
            archive_url: v.archive_url,
            archive_sha256: v.archive_sha256,
            published: v.created_at,
            retracted: v.is_retracted,
        }
    }
}

/// Package listing entry
#[derive(Debug, Serialize)]
pub struct PackageSummaryEntry {
    pub name: String,
    pub description: Option<String>,
    pub is_discontinued: bool,
    pub latest: Option<VersionEntry>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

impl From<PackageSummary> for PackageSummaryEntry {
    fn from(summary: PackageSummary) -> Self {
        Self {
            name: summary.package.name,
            description: summary.package.description,
            is_discontinued: summary.package.is_discontinued,
            latest: summary.latest.map(VersionEntry::from),
            updated: summary.package.updated_at,
        }
    }
}

/// Full package view with every version, newest first
#[derive(Debug, Serialize)]
pub struct PackageEntry {
    pub name: String,
    pub description: Option<String>,
    pub is_discontinued: bool,
    pub replaced_by: Option<String>,
    pub is_private: bool,
    pub latest: Option<VersionEntry>,
    pub versions: Vec<VersionEntry>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated: OffsetDateTime,
}

impl From<PackageDetails> for PackageEntry {
    fn from(details: PackageDetails) -> Self {
        let package = details.package;
        Self {
            name: package.name,
            description: package.description,
            is_discontinued: package.is_discontinued,
            replaced_by: package.replaced_by,
            is_private: package.is_private,
            latest: details.latest.map(VersionEntry::from),
            versions: details.versions.into_iter().map(VersionEntry::from).collect(),
            created: package.created_at,
            updated: package.updated_at,
        }
    }
}

/// Users allowed to publish a package
#[derive(Debug, Serialize)]
pub struct UploadersResponse {
    pub uploaders: Vec<String>,
}

impl From<Vec<User>> for UploadersResponse {
    fn from(users: Vec<User>) -> Self {
        Self {
            uploaders: users.into_iter().map(|u| u.email).collect(),
        }
    }
}

/// Body of a discontinue request
#[derive(Debug, Default, Deserialize)]
pub struct DiscontinueRequest {
    #[serde(default)]
    pub replaced_by: Option<String>,
}
