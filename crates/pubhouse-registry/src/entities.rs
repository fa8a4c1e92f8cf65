//! Core data structures for the pubhouse registry

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for a user
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn generate() -> Self {
        UserId(Uuid::new_v4().to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId(pub Uuid);

impl PackageId {
    pub fn generate() -> Self {
        PackageId(Uuid::new_v4())
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A package, identified by its unique name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,

    /// Name matching `^[a-z][a-z0-9_]*$`
    pub name: String,

    pub description: Option<String>,

    pub is_discontinued: bool,

    /// Suggested replacement once discontinued
    pub replaced_by: Option<String>,

    pub is_private: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Package {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: PackageId::generate(),
            name: name.into(),
            description,
            is_discontinued: false,
            replaced_by: None,
            is_private: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable published version of a package
///
/// Only `is_retracted` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    pub package_id: PackageId,
    pub version: String,

    /// Raw manifest text as uploaded
    pub manifest: String,

    pub readme: Option<String>,
    pub changelog: Option<String>,
    pub archive_url: String,

    /// Hex SHA-256 of the uploaded archive bytes
    pub archive_sha256: String,

    pub is_retracted: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Input for creating a version
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub package_id: PackageId,
    pub version: String,
    pub manifest: String,
    pub readme: Option<String>,
    pub changelog: Option<String>,
    pub archive_url: String,
    pub archive_sha256: String,
}

impl From<NewVersion> for Version {
    fn from(new: NewVersion) -> Self {
        Version {
            id: Uuid::new_v4(),
            package_id: new.package_id,
            version: new.version,
            manifest: new.manifest,
            readme: new.readme,
            changelog: new.changelog,
            archive_url: new.archive_url,
            archive_sha256: new.archive_sha256,
            is_retracted: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A registry user
///
/// The API token is never stored; only its SHA-256 hash lives in the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub is_admin: bool,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn new(email: impl Into<String>, is_admin: bool) -> Self {
        Self {
            id: UserId::generate(),
            email: email.into(),
            is_admin,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// The authenticated identity performing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            is_admin: user.is_admin,
        }
    }
}

/// Request metadata copied into audit entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Audited action tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    PackagePublish,
    VersionPublish,
    VersionRetract,
    PackageDiscontinue,
    UploaderAdd,
    UploaderRemove,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PackagePublish => "package.publish",
            AuditAction::VersionPublish => "package.version.publish",
            AuditAction::VersionRetract => "package.version.retract",
            AuditAction::PackageDiscontinue => "package.discontinue",
            AuditAction::UploaderAdd => "package.uploader.add",
            AuditAction::UploaderRemove => "package.uploader.remove",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Package,
    Version,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Package => "package",
            ResourceType::Version => "version",
        }
    }
}

/// Append-only audit log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,

    /// `None` for system actions
    pub user_id: Option<UserId>,

    pub action: String,
    pub resource_type: String,
    pub resource_id: String,

    /// Free-form context, e.g. the version that was published
    pub details: Option<serde_json::Value>,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl AuditEntry {
    pub fn new(action: AuditAction, resource_type: ResourceType, resource_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            action: action.as_str().to_string(),
            resource_type: resource_type.as_str().to_string(),
            resource_id: resource_id.into(),
            details: None,
            ip_address: None,
            user_agent: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn by(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn from_client(mut self, client: &ClientInfo) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }
}

/// Filters for reading the audit log, newest entries first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub user_id: Option<UserId>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            action: None,
            resource_type: None,
            resource_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

impl AuditQuery {
    /// Whether an entry passes every filter (pagination aside)
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.user_id
            .as_ref()
            .is_none_or(|user| entry.user_id.as_ref() == Some(user))
            && self.action.as_ref().is_none_or(|a| &entry.action == a)
            && self
                .resource_type
                .as_ref()
                .is_none_or(|t| &entry.resource_type == t)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| &entry.resource_id == id)
    }
}

/// One page of audit entries plus the unpaginated total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
}
