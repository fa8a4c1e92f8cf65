//! Version records of packages

use pubhouse::parse_version;
use std::sync::Arc;
use tracing::debug;

use crate::entities::{NewVersion, PackageId, Version};
use crate::error::{RegistryError, Result};
use crate::storage::MetadataStorage;

/// Reads and writes [`Version`] rows
#[derive(Clone)]
pub struct VersionRepository {
    storage: Arc<dyn MetadataStorage>,
}

/// The version a package resolves to when no version is requested
///
/// The highest non-retracted version wins. When every version is retracted the
/// highest retracted one is returned, so a package with versions always has a
/// latest.
pub fn latest_version(versions: &[Version]) -> Option<&Version> {
    pubhouse::max_by_version(versions.iter().filter(|v| !v.is_retracted), |v| v.version.as_str())
        .or_else(|| pubhouse::max_by_version(versions, |v| v.version.as_str()))
}

impl VersionRepository {
    pub fn new(storage: Arc<dyn MetadataStorage>) -> Self {
        Self { storage }
    }

    /// All versions of a package, newest first
    pub async fn list_for_package(&self, package_id: &PackageId) -> Result<Vec<Version>> {
        self.storage.list_versions(package_id).await
    }

    pub async fn find(&self, package_id: &PackageId, version: &str) -> Result<Option<Version>> {
        self.storage.get_version(package_id, version).await
    }

    pub async fn get(&self, package_id: &PackageId, version: &str) -> Result<Version> {
        self.find(package_id, version)
            .await?
            .ok_or_else(|| RegistryError::VersionNotFound {
                package: package_id.to_string(),
                version: version.to_string(),
            })
    }

    /// Highest version by semantic version order, see [`latest_version`]
    pub async fn get_latest(&self, package_id: &PackageId) -> Result<Version> {
        let versions = self.list_for_package(package_id).await?;
        latest_version(&versions)
            .cloned()
            .ok_or_else(|| RegistryError::NoVersions(package_id.to_string()))
    }

    pub async fn create(&self, new: NewVersion) -> Result<Version> {
        parse_version(&new.version).map_err(|e| RegistryError::InvalidVersion {
            version: new.version.clone(),
            reason: e.to_string(),
        })?;

        if self.find(&new.package_id, &new.version).await?.is_some() {
            return Err(RegistryError::VersionExists {
                package: new.package_id.to_string(),
                version: new.version,
            });
        }

        // A concurrent insert that slipped past the check above is rejected by the
        // storage unique constraint with the same error
        let version = Version::from(new);
        self.storage.insert_version(&version).await?;

        debug!(package_id = %version.package_id, version = %version.version, "version created");
        Ok(version)
    }

    pub async fn retract(&self, package_id: &PackageId, version: &str) -> Result<Version> {
        if !self
            .storage
            .set_version_retracted(package_id, version, true)
            .await?
        {
            return Err(RegistryError::VersionNotFound {
                package: package_id.to_string(),
                version: version.to_string(),
            });
        }

        self.get(package_id, version).await
    }
}
