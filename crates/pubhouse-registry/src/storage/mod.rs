//! Storage abstraction for registry data
//!
//! Archives live in a [`BlobStorage`]; everything else (packages, versions,
//! uploader grants, users, audit log) lives in a [`MetadataStorage`]. The
//! metadata backend owns the uniqueness constraints the publish pipeline relies
//! on: package names and (package, version) pairs are unique, and a new package
//! is inserted together with its first uploader grant or not at all.

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::entities::*;
use crate::error::Result;

pub mod blob_storage;
pub mod filesystem;
pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;

pub use blob_storage::{BlobStorage, MemoryStorage, StorageError};
pub use filesystem::FileSystemStorage;
pub use memory::MemoryMetadataStorage;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStorage;

/// Relational metadata storage
#[async_trait]
pub trait MetadataStorage: Send + Sync {
    // === Packages ===

    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>>;

    async fn get_package_by_name(&self, name: &str) -> Result<Option<Package>>;

    /// Packages ordered by name, optionally filtered by a name substring, plus the
    /// unpaginated total
    async fn list_packages(
        &self,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Package>, u64)>;

    /// Insert a package together with the grant for its creator
    ///
    /// Fails with `PackageExists` when the name is taken, in which case nothing is
    /// written.
    async fn create_package(&self, package: &Package, owner: &UserId) -> Result<()>;

    /// Update the mutable package fields (description, discontinuation, updated_at)
    async fn update_package(&self, package: &Package) -> Result<()>;

    /// Set `updated_at`, and the description when one is given, leaving every
    /// other column alone
    async fn touch_package(
        &self,
        id: &PackageId,
        description: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> Result<()>;

    // === Versions ===

    /// All versions of a package, newest first
    async fn list_versions(&self, package_id: &PackageId) -> Result<Vec<Version>>;

    async fn get_version(&self, package_id: &PackageId, version: &str) -> Result<Option<Version>>;

    /// Fails with `VersionExists` when the (package, version) pair is taken
    async fn insert_version(&self, version: &Version) -> Result<()>;

    /// Returns false when no such version exists
    async fn set_version_retracted(
        &self,
        package_id: &PackageId,
        version: &str,
        retracted: bool,
    ) -> Result<bool>;

    // === Uploaders ===

    /// Idempotent
    async fn insert_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<()>;

    /// Returns false when the grant did not exist
    async fn delete_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool>;

    async fn delete_uploaders(&self, package_id: &PackageId) -> Result<u64>;

    async fn list_uploaders(&self, package_id: &PackageId) -> Result<Vec<UserId>>;

    async fn has_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool>;

    // === Audit log ===

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()>;

    /// Matching entries, newest first
    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage>;

    // === Users ===

    /// Fails with `UserExists` when the email or token hash is taken
    async fn insert_user(&self, user: &User, token_hash: &str) -> Result<()>;

    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>>;
}
