//! In-memory metadata storage for tests and development
//!
//! All tables live behind one mutex, so every operation is atomic and the
//! uniqueness rules hold exactly as they do in the SQLite backend.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;

use super::MetadataStorage;
use crate::entities::*;
use crate::error::{RegistryError, Result};

#[derive(Default)]
pub struct MemoryMetadataStorage {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    packages: HashMap<PackageId, Package>,
    /// Insertion order
    versions: Vec<Version>,
    uploaders: BTreeSet<(PackageId, UserId)>,
    /// Insertion order
    audit: Vec<AuditEntry>,
    users: Vec<StoredUser>,
}

struct StoredUser {
    user: User,
    token_hash: String,
}

impl State {
    fn package_by_name(&self, name: &str) -> Option<&Package> {
        self.packages.values().find(|p| p.name == name)
    }

    fn version_mut(&mut self, package_id: &PackageId, version: &str) -> Option<&mut Version> {
        self.versions
            .iter_mut()
            .find(|v| &v.package_id == package_id && v.version == version)
    }
}

impl MemoryMetadataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| RegistryError::Storage("Lock poisoned".into()))
    }
}

fn page<T>(items: impl Iterator<Item = T>, limit: u32, offset: u32) -> Vec<T> {
    items.skip(offset as usize).take(limit as usize).collect()
}

#[async_trait]
impl MetadataStorage for MemoryMetadataStorage {
    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>> {
        Ok(self.state()?.packages.get(id).cloned())
    }

    async fn get_package_by_name(&self, name: &str) -> Result<Option<Package>> {
        Ok(self.state()?.package_by_name(name).cloned())
    }

    async fn list_packages(
        &self,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Package>, u64)> {
        let state = self.state()?;
        let mut matching: Vec<&Package> = state
            .packages
            .values()
            .filter(|p| search.is_none_or(|s| p.name.contains(s)))
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));

        let total = matching.len() as u64;
        Ok((page(matching.into_iter().cloned(), limit, offset), total))
    }

    async fn create_package(&self, package: &Package, owner: &UserId) -> Result<()> {
        let mut state = self.state()?;
        if state.package_by_name(&package.name).is_some() {
            return Err(RegistryError::PackageExists(package.name.clone()));
        }

        state.packages.insert(package.id, package.clone());
        state.uploaders.insert((package.id, owner.clone()));
        Ok(())
    }

    async fn update_package(&self, package: &Package) -> Result<()> {
        let mut state = self.state()?;
        let stored = state
            .packages
            .get_mut(&package.id)
            .ok_or_else(|| RegistryError::PackageNotFound(package.name.clone()))?;

        stored.description = package.description.clone();
        stored.is_discontinued = package.is_discontinued;
        stored.replaced_by = package.replaced_by.clone();
        stored.updated_at = package.updated_at;
        Ok(())
    }

    async fn touch_package(
        &self,
        id: &PackageId,
        description: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> Result<()> {
        let mut state = self.state()?;
        let stored = state
            .packages
            .get_mut(id)
            .ok_or_else(|| RegistryError::PackageNotFound(id.to_string()))?;

        if let Some(description) = description {
            stored.description = Some(description.to_string());
        }
        stored.updated_at = updated_at;
        Ok(())
    }

    async fn list_versions(&self, package_id: &PackageId) -> Result<Vec<Version>> {
        Ok(self
            .state()?
            .versions
            .iter()
            .rev()
            .filter(|v| &v.package_id == package_id)
            .cloned()
            .collect())
    }

    async fn get_version(&self, package_id: &PackageId, version: &str) -> Result<Option<Version>> {
        Ok(self
            .state()?
            .versions
            .iter()
            .find(|v| &v.package_id == package_id && v.version == version)
            .cloned())
    }

    async fn insert_version(&self, version: &Version) -> Result<()> {
        let mut state = self.state()?;
        if state.version_mut(&version.package_id, &version.version).is_some() {
            return Err(RegistryError::VersionExists {
                package: version.package_id.to_string(),
                version: version.version.clone(),
            });
        }

        state.versions.push(version.clone());
        Ok(())
    }

    async fn set_version_retracted(
        &self,
        package_id: &PackageId,
        version: &str,
        retracted: bool,
    ) -> Result<bool> {
        let mut state = self.state()?;
        Ok(match state.version_mut(package_id, version) {
            Some(stored) => {
                stored.is_retracted = retracted;
                true
            }
            None => false,
        })
    }

    async fn insert_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<()> {
        self.state()?
            .uploaders
            .insert((*package_id, user_id.clone()));
        Ok(())
    }

    async fn delete_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .state()?
            .uploaders
            .remove(&(*package_id, user_id.clone())))
    }

    async fn delete_uploaders(&self, package_id: &PackageId) -> Result<u64> {
        let mut state = self.state()?;
        let before = state.uploaders.len();
        state.uploaders.retain(|(package, _)| package != package_id);
        Ok((before - state.uploaders.len()) as u64)
    }

    async fn list_uploaders(&self, package_id: &PackageId) -> Result<Vec<UserId>> {
        Ok(self
            .state()?
            .uploaders
            .iter()
            .filter(|(package, _)| package == package_id)
            .map(|(_, user)| user.clone())
            .collect())
    }

    async fn has_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .state()?
            .uploaders
            .contains(&(*package_id, user_id.clone())))
    }

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        self.state()?.audit.push(entry.clone());
        Ok(())
    }

    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage> {
        let state = self.state()?;
        let matching: Vec<&AuditEntry> = state
            .audit
            .iter()
            .rev()
            .filter(|entry| query.matches(entry))
            .collect();

        Ok(AuditPage {
            total: matching.len() as u64,
            entries: page(matching.into_iter().cloned(), query.limit, query.offset),
        })
    }

    async fn insert_user(&self, user: &User, token_hash: &str) -> Result<()> {
        let mut state = self.state()?;
        if state
            .users
            .iter()
            .any(|u| u.user.email == user.email || u.token_hash == token_hash)
        {
            return Err(RegistryError::UserExists(user.email.clone()));
        }

        state.users.push(StoredUser {
            user: user.clone(),
            token_hash: token_hash.to_string(),
        });
        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self
            .state()?
            .users
            .iter()
            .find(|u| &u.user.id == id)
            .map(|u| u.user.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .state()?
            .users
            .iter()
            .find(|u| u.user.email == email)
            .map(|u| u.user.clone()))
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        Ok(self
            .state()?
            .users
            .iter()
            .find(|u| u.token_hash == token_hash)
            .map(|u| u.user.clone()))
    }
}
