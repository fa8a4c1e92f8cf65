//! Who may publish new versions of a package
//!
//! Uploader grants are plain (package, user) pairs. Administrators may publish to
//! any package; that bypass is applied by callers, not here.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::entities::{PackageId, UserId};
use crate::error::{RegistryError, Result};
use crate::storage::MetadataStorage;

#[derive(Clone)]
pub struct UploaderAuthority {
    storage: Arc<dyn MetadataStorage>,
}

/// Outcome of [`UploaderAuthority::set_uploaders`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploaderChanges {
    pub added: Vec<UserId>,
    pub removed: Vec<UserId>,
    /// Grants after the change
    pub uploaders: Vec<UserId>,
}

impl UploaderAuthority {
    pub fn new(storage: Arc<dyn MetadataStorage>) -> Self {
        Self { storage }
    }

    /// Grant publish rights; granting twice is a no-op
    pub async fn add_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<()> {
        self.storage.insert_uploader(package_id, user_id).await?;
        debug!(%package_id, %user_id, "uploader added");
        Ok(())
    }

    pub async fn remove_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<()> {
        if !self.storage.delete_uploader(package_id, user_id).await? {
            return Err(RegistryError::UploaderNotFound {
                package: package_id.to_string(),
                user: user_id.to_string(),
            });
        }
        debug!(%package_id, %user_id, "uploader removed");
        Ok(())
    }

    /// Current grants, in no particular order
    pub async fn list_uploaders(&self, package_id: &PackageId) -> Result<Vec<UserId>> {
        self.storage.list_uploaders(package_id).await
    }

    pub async fn can_publish(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        self.storage.has_uploader(package_id, user_id).await
    }

    pub async fn remove_all_uploaders(&self, package_id: &PackageId) -> Result<()> {
        let removed = self.storage.delete_uploaders(package_id).await?;
        debug!(%package_id, removed, "uploaders cleared");
        Ok(())
    }

    /// Replace the grants of a package with exactly `desired`
    ///
    /// Removals are applied before additions. An empty set is rejected so a package
    /// cannot be left without anyone able to publish it.
    pub async fn set_uploaders(
        &self,
        package_id: &PackageId,
        desired: &[UserId],
    ) -> Result<UploaderChanges> {
        let desired: BTreeSet<&UserId> = desired.iter().collect();
        if desired.is_empty() {
            return Err(RegistryError::BadRequest(
                "A package needs at least one uploader".into(),
            ));
        }

        let current = self.list_uploaders(package_id).await?;
        let current_set: BTreeSet<&UserId> = current.iter().collect();

        let removed: Vec<UserId> = current_set
            .difference(&desired)
            .map(|user| (*user).clone())
            .collect();
        let added: Vec<UserId> = desired
            .difference(&current_set)
            .map(|user| (*user).clone())
            .collect();

        for user_id in &removed {
            // Already gone is fine here
            self.storage.delete_uploader(package_id, user_id).await?;
        }
        for user_id in &added {
            self.storage.insert_uploader(package_id, user_id).await?;
        }

        debug!(%package_id, added = added.len(), removed = removed.len(), "uploaders replaced");

        Ok(UploaderChanges {
            added,
            removed,
            uploaders: self.list_uploaders(package_id).await?,
        })
    }
}
