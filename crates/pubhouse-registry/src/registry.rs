//! High-level registry interface for package management
//!
//! [`Registry`] ties the storage backends, the permission model, the audit trail
//! and the job queue together. Its [`publish`](Registry::publish) method is the
//! whole upload pipeline:
//!
//! ```text
//! RECEIVED -> VALIDATED -> AUTHORIZED -> STORED -> RECORDED -> ENQUEUED -> RESPONDED
//!     \___________\____________\____________\___________\___________\--> FAILED(kind)
//! ```
//!
//! Every check that can reject an upload runs before the archive is written.
//! The registry takes no locks: concurrent publishes of the same version are
//! settled by the no-overwrite archive write, and concurrent creations of the
//! same package by the unique constraints of the metadata storage.

use bytes::Bytes;
use pubhouse::{
    Manifest, ValidatedArchive, is_valid_package_name, parse_version, sort_by_version_desc,
    validate_archive,
};
use pubhouse_worker::{JobId, JobQueue};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::address::ContentAddress;
use crate::audit::AuditRecorder;
use crate::docs::{DocsIndex, DocsJob};
use crate::entities::*;
use crate::error::{ErrorKind, RegistryError, Result};
use crate::storage::{BlobStorage, MetadataStorage, StorageError};
use crate::uploaders::UploaderAuthority;
use crate::versions::{VersionRepository, latest_version};

/// Registry settings
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Public base URL used to build archive download URLs
    pub base_url: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Steps of the publish pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStage {
    Received,
    Validated,
    Authorized,
    Stored,
    Recorded,
    Enqueued,
    Responded,
    Failed(ErrorKind),
}

impl PublishStage {
    fn advance(&mut self, next: PublishStage) {
        debug!(from = %self, to = %next, "publish stage");
        *self = next;
    }
}

impl fmt::Display for PublishStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishStage::Received => f.write_str("received"),
            PublishStage::Validated => f.write_str("validated"),
            PublishStage::Authorized => f.write_str("authorized"),
            PublishStage::Stored => f.write_str("stored"),
            PublishStage::Recorded => f.write_str("recorded"),
            PublishStage::Enqueued => f.write_str("enqueued"),
            PublishStage::Responded => f.write_str("responded"),
            PublishStage::Failed(kind) => write!(f, "failed({})", kind),
        }
    }
}

/// Result of a successful publish
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub package: Package,
    pub version: Version,
    pub is_new_package: bool,
    /// Documentation job, unless it could not be enqueued
    pub docs_job: Option<JobId>,
}

impl PublishReceipt {
    pub fn message(&self) -> String {
        format!(
            "Successfully uploaded package {} version {}.",
            self.package.name, self.version.version
        )
    }
}

/// A package with all of its versions
#[derive(Debug, Clone)]
pub struct PackageDetails {
    pub package: Package,
    pub latest: Option<Version>,
    /// Highest semantic version first
    pub versions: Vec<Version>,
}

/// A package with its latest version, as shown in listings
#[derive(Debug, Clone)]
pub struct PackageSummary {
    pub package: Package,
    pub latest: Option<Version>,
}

pub struct Registry {
    config: RegistryConfig,
    metadata: Arc<dyn MetadataStorage>,
    blobs: Arc<dyn BlobStorage>,
    versions: VersionRepository,
    uploaders: UploaderAuthority,
    audit: AuditRecorder,
    jobs: JobQueue,
}

impl Registry {
    /// Create a new registry with the given storage backends and job queue
    pub fn new(
        config: RegistryConfig,
        metadata: Arc<dyn MetadataStorage>,
        blobs: Arc<dyn BlobStorage>,
        jobs: JobQueue,
    ) -> Self {
        Self {
            config,
            versions: VersionRepository::new(metadata.clone()),
            uploaders: UploaderAuthority::new(metadata.clone()),
            audit: AuditRecorder::new(metadata.clone()),
            metadata,
            blobs,
            jobs,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn versions(&self) -> &VersionRepository {
        &self.versions
    }

    pub fn uploaders(&self) -> &UploaderAuthority {
        &self.uploaders
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStorage> {
        &self.blobs
    }

    // === Publishing ===

    /// Publish an uploaded package archive
    ///
    /// On success the archive is stored, the version is recorded, an audit entry is
    /// written in the background and documentation generation is queued. Failures
    /// before the archive is stored leave no trace in the registry.
    pub async fn publish(
        &self,
        archive: Bytes,
        actor: &Actor,
        client: &ClientInfo,
    ) -> Result<PublishReceipt> {
        let span = info_span!("publish", user_id = %actor.user_id, bytes = archive.len());

        async move {
            let mut stage = PublishStage::Received;
            debug!(stage = %stage, "publish received");

            match self.run_publish(archive, actor, client, &mut stage).await {
                Ok(receipt) => {
                    stage.advance(PublishStage::Responded);
                    info!(
                        package = %receipt.package.name,
                        version = %receipt.version.version,
                        new_package = receipt.is_new_package,
                        "package version published"
                    );
                    Ok(receipt)
                }
                Err(e) => {
                    let failed_at = stage;
                    stage.advance(PublishStage::Failed(e.kind()));
                    warn!(stage = %failed_at, error = %e, "publish rejected");
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_publish(
        &self,
        archive: Bytes,
        actor: &Actor,
        client: &ClientInfo,
        stage: &mut PublishStage,
    ) -> Result<PublishReceipt> {
        if archive.is_empty() {
            return Err(RegistryError::BadRequest("Upload body is empty".into()));
        }

        // Decompression is CPU bound, keep it off the request workers
        let validated = {
            let archive = archive.clone();
            tokio::task::spawn_blocking(move || validate_archive(&archive))
                .await
                .map_err(|e| RegistryError::Task(format!("Archive validation panicked: {}", e)))??
        };
        let name = validated.manifest.name.clone();
        let version = validated.manifest.version.clone();
        stage.advance(PublishStage::Validated);
        debug!(package = %name, version = %version, files = validated.files.len(), "archive valid");

        let existing = self.metadata.get_package_by_name(&name).await?;
        if let Some(package) = &existing {
            self.authorize(package, actor).await?;
            if self.versions.find(&package.id, &version).await?.is_some() {
                return Err(RegistryError::VersionExists { package: name, version });
            }
        }
        stage.advance(PublishStage::Authorized);

        let archive_sha256 = ContentAddress::sha256_hex(&archive);
        let archive_key = ContentAddress::archive_key(&name, &version);
        // Only one publisher of a version gets to store its archive
        match self.blobs.put_if_absent(&archive_key, archive).await {
            Ok(()) => {}
            Err(StorageError::AlreadyExists(_)) => {
                return Err(RegistryError::VersionExists { package: name, version });
            }
            Err(e) => return Err(e.into()),
        }
        stage.advance(PublishStage::Stored);

        let manifest = validated.manifest.clone();
        let (package, is_new_package, created) = match self
            .record_version(existing, validated, archive_sha256, actor)
            .await
        {
            Ok(recorded) => recorded,
            Err(e) => {
                // The archive belongs to this publish alone, so nothing else references it
                if let Err(cleanup) = self.blobs.delete(&archive_key).await {
                    warn!(key = %archive_key, error = %cleanup, "failed to remove unrecorded archive");
                }
                return Err(e);
            }
        };

        let package = if is_new_package {
            package
        } else {
            self.refresh_package(package, &manifest).await
        };
        stage.advance(PublishStage::Recorded);

        let action = if is_new_package {
            AuditAction::PackagePublish
        } else {
            AuditAction::VersionPublish
        };
        let _ = self.audit.record_detached(
            AuditEntry::new(action, ResourceType::Package, package.id.to_string())
                .by(actor.user_id.clone())
                .details(json!({ "package": name, "version": version }))
                .from_client(client),
        );

        let docs_job = match self
            .jobs
            .enqueue(DocsJob::new(self.blobs.clone(), &name, &version))
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(package = %name, version = %version, error = %e, "documentation job not enqueued");
                None
            }
        };
        stage.advance(PublishStage::Enqueued);

        Ok(PublishReceipt {
            package,
            version: created,
            is_new_package,
            docs_job,
        })
    }

    /// Insert the version row, creating the package first when it is new
    async fn record_version(
        &self,
        existing: Option<Package>,
        validated: ValidatedArchive,
        archive_sha256: String,
        actor: &Actor,
    ) -> Result<(Package, bool, Version)> {
        let manifest = &validated.manifest;
        let (package, is_new_package) = match existing {
            Some(package) => (package, false),
            None => self.claim_package(manifest, actor).await?,
        };

        let created = self
            .versions
            .create(NewVersion {
                package_id: package.id,
                version: manifest.version.clone(),
                manifest: manifest.raw().to_string(),
                archive_url: ContentAddress::archive_url(
                    &self.config.base_url,
                    &manifest.name,
                    &manifest.version,
                ),
                readme: validated.readme,
                changelog: validated.changelog,
                archive_sha256,
            })
            .await
            .map_err(|e| match e {
                RegistryError::VersionExists { .. } => RegistryError::VersionExists {
                    package: manifest.name.clone(),
                    version: manifest.version.clone(),
                },
                other => other,
            })?;

        Ok((package, is_new_package, created))
    }

    /// Create a package owned by the actor, or join the one a concurrent publish
    /// created first
    async fn claim_package(&self, manifest: &Manifest, actor: &Actor) -> Result<(Package, bool)> {
        let package = Package::new(&manifest.name, manifest.description.clone());

        match self.metadata.create_package(&package, &actor.user_id).await {
            Ok(()) => {
                debug!(package = %package.name, package_id = %package.id, "package created");
                Ok((package, true))
            }
            Err(RegistryError::PackageExists(_)) => {
                let package = self.get_package(&manifest.name).await?;
                self.authorize(&package, actor).await?;
                Ok((package, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Bump `updated_at` and pick up a new description; failures are only logged.
    /// Only those two columns are written so a concurrent discontinue survives.
    async fn refresh_package(&self, package: Package, manifest: &Manifest) -> Package {
        let touched = self
            .metadata
            .touch_package(&package.id, manifest.description.as_deref(), OffsetDateTime::now_utc())
            .await;
        if let Err(e) = touched {
            warn!(package = %package.name, error = %e, "failed to refresh package");
            return package;
        }

        match self.metadata.get_package(&package.id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => package,
            Err(e) => {
                warn!(package = %package.name, error = %e, "failed to reload package");
                package
            }
        }
    }

    /// Administrators may change any package, everyone else needs an uploader grant
    async fn authorize(&self, package: &Package, actor: &Actor) -> Result<()> {
        if actor.is_admin || self.uploaders.can_publish(&package.id, &actor.user_id).await? {
            return Ok(());
        }

        Err(RegistryError::Forbidden(format!(
            "You are not an uploader of package {}",
            package.name
        )))
    }

    fn require_admin(actor: &Actor) -> Result<()> {
        if actor.is_admin {
            Ok(())
        } else {
            Err(RegistryError::Forbidden("Administrator access required".into()))
        }
    }

    // === Lookups ===

    pub async fn get_package(&self, name: &str) -> Result<Package> {
        self.metadata
            .get_package_by_name(name)
            .await?
            .ok_or_else(|| RegistryError::PackageNotFound(name.to_string()))
    }

    pub async fn package_details(&self, name: &str) -> Result<PackageDetails> {
        let package = self.get_package(name).await?;
        let mut versions = self.versions.list_for_package(&package.id).await?;
        let latest = latest_version(&versions).cloned();
        sort_by_version_desc(&mut versions, |v| v.version.as_str());

        Ok(PackageDetails {
            package,
            latest,
            versions,
        })
    }

    /// Packages by name, with their latest version, plus the total match count
    pub async fn list_packages(
        &self,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<PackageSummary>, u64)> {
        let (packages, total) = self.metadata.list_packages(search, limit, offset).await?;

        let mut summaries = Vec::with_capacity(packages.len());
        for package in packages {
            let versions = self.versions.list_for_package(&package.id).await?;
            summaries.push(PackageSummary {
                latest: latest_version(&versions).cloned(),
                package,
            });
        }

        Ok((summaries, total))
    }

    pub async fn get_version(&self, name: &str, version: &str) -> Result<Version> {
        let package = self.get_package(name).await?;
        self.versions
            .find(&package.id, version)
            .await?
            .ok_or_else(|| RegistryError::VersionNotFound {
                package: name.to_string(),
                version: version.to_string(),
            })
    }

    /// Raw archive bytes of a published version
    pub async fn fetch_archive(&self, name: &str, version: &str) -> Result<Bytes> {
        let key = Self::checked_key(name, version, ContentAddress::archive_key)?;
        self.blobs.get(&key).await.map_err(|e| match e {
            StorageError::NotFound(_) => RegistryError::VersionNotFound {
                package: name.to_string(),
                version: version.to_string(),
            },
            other => other.into(),
        })
    }

    /// Generated documentation index; not found until the job has run
    pub async fn fetch_docs(&self, name: &str, version: &str) -> Result<DocsIndex> {
        let key = Self::checked_key(name, version, ContentAddress::docs_key)?;
        let body = self.blobs.get(&key).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Storage key for a name and version taken from a request
    fn checked_key(name: &str, version: &str, key: fn(&str, &str) -> String) -> Result<String> {
        if !is_valid_package_name(name) {
            return Err(RegistryError::PackageNotFound(name.to_string()));
        }
        if parse_version(version).is_err() {
            return Err(RegistryError::VersionNotFound {
                package: name.to_string(),
                version: version.to_string(),
            });
        }
        Ok(key(name, version))
    }

    // === Package maintenance ===

    /// Mark a version as retracted; it stays listed and downloadable
    pub async fn retract_version(
        &self,
        name: &str,
        version: &str,
        actor: &Actor,
        client: &ClientInfo,
    ) -> Result<Version> {
        let package = self.get_package(name).await?;
        self.authorize(&package, actor).await?;

        if self.versions.find(&package.id, version).await?.is_none() {
            return Err(RegistryError::VersionNotFound {
                package: name.to_string(),
                version: version.to_string(),
            });
        }
        let retracted = self.versions.retract(&package.id, version).await?;

        let _ = self.audit.record_detached(
            AuditEntry::new(
                AuditAction::VersionRetract,
                ResourceType::Version,
                retracted.id.to_string(),
            )
            .by(actor.user_id.clone())
            .details(json!({ "package": name, "version": version }))
            .from_client(client),
        );
        info!(package = %name, version = %version, "version retracted");

        Ok(retracted)
    }

    pub async fn discontinue_package(
        &self,
        name: &str,
        replaced_by: Option<String>,
        actor: &Actor,
        client: &ClientInfo,
    ) -> Result<Package> {
        let mut package = self.get_package(name).await?;
        self.authorize(&package, actor).await?;

        if let Some(replacement) = &replaced_by {
            if !is_valid_package_name(replacement) || replacement == name {
                return Err(RegistryError::BadRequest(format!(
                    "Invalid replacement package `{}`",
                    replacement
                )));
            }
        }

        package.is_discontinued = true;
        package.replaced_by = replaced_by;
        package.updated_at = OffsetDateTime::now_utc();
        self.metadata.update_package(&package).await?;

        let _ = self.audit.record_detached(
            AuditEntry::new(
                AuditAction::PackageDiscontinue,
                ResourceType::Package,
                package.id.to_string(),
            )
            .by(actor.user_id.clone())
            .details(json!({ "package": name, "replaced_by": package.replaced_by }))
            .from_client(client),
        );
        info!(package = %name, replaced_by = ?package.replaced_by, "package discontinued");

        Ok(package)
    }

    /// Users allowed to publish the package
    pub async fn list_uploaders(&self, name: &str) -> Result<Vec<User>> {
        let package = self.get_package(name).await?;

        let mut users = Vec::new();
        for user_id in self.uploaders.list_uploaders(&package.id).await? {
            match self.metadata.get_user(&user_id).await? {
                Some(user) => users.push(user),
                None => warn!(package = %name, %user_id, "uploader grant for unknown user"),
            }
        }
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    /// Replace the uploaders of a package, identified by email (administrators only)
    pub async fn set_uploaders(
        &self,
        name: &str,
        emails: &[String],
        actor: &Actor,
        client: &ClientInfo,
    ) -> Result<Vec<User>> {
        Self::require_admin(actor)?;
        let package = self.get_package(name).await?;

        let mut desired = Vec::with_capacity(emails.len());
        for email in emails {
            let user = self
                .metadata
                .get_user_by_email(email)
                .await?
                .ok_or_else(|| RegistryError::UserNotFound(email.clone()))?;
            desired.push(user.id);
        }

        let changes = self.uploaders.set_uploaders(&package.id, &desired).await?;

        let audited = changes
            .added
            .iter()
            .map(|user| (AuditAction::UploaderAdd, user))
            .chain(changes.removed.iter().map(|user| (AuditAction::UploaderRemove, user)));
        for (action, user_id) in audited {
            let _ = self.audit.record_detached(
                AuditEntry::new(action, ResourceType::Package, package.id.to_string())
                    .by(actor.user_id.clone())
                    .details(json!({ "package": name, "user_id": user_id }))
                    .from_client(client),
            );
        }
        info!(
            package = %name,
            added = changes.added.len(),
            removed = changes.removed.len(),
            "uploaders updated"
        );

        self.list_uploaders(name).await
    }

    /// Read the audit log (administrators only)
    pub async fn query_audit(&self, query: &AuditQuery, actor: &Actor) -> Result<AuditPage> {
        Self::require_admin(actor)?;
        self.audit.query(query).await
    }

    // === Users ===

    /// Register a user with an API token; only the token hash is stored
    pub async fn create_user(&self, email: &str, is_admin: bool, token: &str) -> Result<User> {
        if !email.contains('@') {
            return Err(RegistryError::BadRequest(format!("Invalid email `{}`", email)));
        }
        if token.is_empty() {
            return Err(RegistryError::BadRequest("API token must not be empty".into()));
        }

        let user = User::new(email, is_admin);
        self.metadata
            .insert_user(&user, &ContentAddress::sha256_hex(token.as_bytes()))
            .await?;

        info!(user_id = %user.id, email = %user.email, is_admin, "user created");
        Ok(user)
    }

    /// Return the user with this email, creating it if absent
    pub async fn ensure_user(&self, email: &str, is_admin: bool, token: &str) -> Result<User> {
        match self.metadata.get_user_by_email(email).await? {
            Some(user) => Ok(user),
            None => self.create_user(email, is_admin, token).await,
        }
    }

    /// Resolve an API token to its user
    pub async fn authenticate(&self, token: &str) -> Result<Option<User>> {
        if token.is_empty() {
            return Ok(None);
        }
        self.metadata
            .get_user_by_token_hash(&ContentAddress::sha256_hex(token.as_bytes()))
            .await
    }

    pub async fn get_user(&self, id: &UserId) -> Result<User> {
        self.metadata
            .get_user(id)
            .await?
            .ok_or_else(|| RegistryError::UserNotFound(id.to_string()))
    }
}
