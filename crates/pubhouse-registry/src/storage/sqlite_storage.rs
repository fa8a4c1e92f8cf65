//! SQLite metadata storage implementation
//!
//! This module provides a SQLite-based implementation of the MetadataStorage trait.
//! Uniqueness of package names, (package, version) pairs, user emails and token
//! hashes is enforced by the schema; the registry relies on those constraints
//! rather than on locks to settle concurrent publishes.

use super::MetadataStorage;
use crate::{RegistryError, entities::*, error::Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// SQLite-based metadata storage implementation
pub struct SqliteStorage {
    pool: SqlitePool,
}

const PACKAGE_COLUMNS: &str =
    "id, name, description, is_discontinued, replaced_by, is_private, created_at, updated_at";

const VERSION_COLUMNS: &str = "id, package_id, version, manifest, readme, changelog, archive_url, archive_sha256, is_retracted, created_at";

const AUDIT_COLUMNS: &str =
    "id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, created_at";

const USER_COLUMNS: &str = "id, email, is_admin, created_at";

const AUDIT_FILTER: &str = r#"
    (?1 IS NULL OR user_id = ?1)
    AND (?2 IS NULL OR action = ?2)
    AND (?3 IS NULL OR resource_type = ?3)
    AND (?4 IS NULL OR resource_id = ?4)
"#;

impl SqliteStorage {
    /// Create a new SQLite storage instance with the given database URL
    ///
    /// Example: `sqlite:./data/pubhouse.db`
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| RegistryError::Storage(format!("Invalid database path: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to connect to SQLite: {}", e)))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<()> {
        let statements = [
            (
                "packages table",
                r#"
                CREATE TABLE IF NOT EXISTS packages (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    description TEXT,
                    is_discontinued INTEGER NOT NULL DEFAULT 0,
                    replaced_by TEXT,
                    is_private INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "versions table",
                r#"
                CREATE TABLE IF NOT EXISTS versions (
                    id TEXT PRIMARY KEY,
                    package_id TEXT NOT NULL REFERENCES packages(id),
                    version TEXT NOT NULL,
                    manifest TEXT NOT NULL,
                    readme TEXT,
                    changelog TEXT,
                    archive_url TEXT NOT NULL,
                    archive_sha256 TEXT NOT NULL,
                    is_retracted INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    UNIQUE (package_id, version)
                )
                "#,
            ),
            (
                "package_uploaders table",
                r#"
                CREATE TABLE IF NOT EXISTS package_uploaders (
                    package_id TEXT NOT NULL REFERENCES packages(id),
                    user_id TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (package_id, user_id)
                )
                "#,
            ),
            (
                "users table",
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    is_admin INTEGER NOT NULL DEFAULT 0,
                    token_hash TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "audit_logs table",
                r#"
                CREATE TABLE IF NOT EXISTS audit_logs (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL UNIQUE,
                    user_id TEXT,                        -- NULL for system actions
                    action TEXT NOT NULL,
                    resource_type TEXT NOT NULL,
                    resource_id TEXT NOT NULL,
                    details TEXT,                        -- JSON
                    ip_address TEXT,
                    user_agent TEXT,
                    created_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "versions index",
                "CREATE INDEX IF NOT EXISTS idx_versions_package ON versions(package_id)",
            ),
            (
                "uploaders index",
                "CREATE INDEX IF NOT EXISTS idx_uploaders_user ON package_uploaders(user_id)",
            ),
            (
                "audit user index",
                "CREATE INDEX IF NOT EXISTS idx_audit_user ON audit_logs(user_id)",
            ),
            (
                "audit resource index",
                "CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_logs(resource_type, resource_id)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| RegistryError::Storage(format!("Failed to create {}: {}", what, e)))?;
        }

        Ok(())
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn format_timestamp(ts: OffsetDateTime) -> Result<String> {
    ts.format(&Rfc3339)
        .map_err(|e| RegistryError::Storage(format!("Failed to format timestamp: {}", e)))
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|e| RegistryError::Storage(format!("Invalid timestamp {}: {}", raw, e)))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| RegistryError::Storage(format!("Invalid id {}: {}", raw, e)))
}

fn package_from_row(row: &SqliteRow) -> Result<Package> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");

    Ok(Package {
        id: PackageId(parse_uuid(&id)?),
        name: row.get("name"),
        description: row.get("description"),
        is_discontinued: row.get("is_discontinued"),
        replaced_by: row.get("replaced_by"),
        is_private: row.get("is_private"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<Version> {
    let id: String = row.get("id");
    let package_id: String = row.get("package_id");
    let created_at: String = row.get("created_at");

    Ok(Version {
        id: parse_uuid(&id)?,
        package_id: PackageId(parse_uuid(&package_id)?),
        version: row.get("version"),
        manifest: row.get("manifest"),
        readme: row.get("readme"),
        changelog: row.get("changelog"),
        archive_url: row.get("archive_url"),
        archive_sha256: row.get("archive_sha256"),
        is_retracted: row.get("is_retracted"),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn audit_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let id: String = row.get("id");
    let user_id: Option<String> = row.get("user_id");
    let details: Option<String> = row.get("details");
    let created_at: String = row.get("created_at");

    Ok(AuditEntry {
        id: parse_uuid(&id)?,
        user_id: user_id.map(UserId),
        action: row.get("action"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        details: details.as_deref().map(|raw| serde_json::from_str(raw)).transpose()?,
        ip_address: row.get("ip_address"),
        user_agent: row.get("user_agent"),
        created_at: parse_timestamp(&created_at)?,
    })
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let created_at: String = row.get("created_at");

    Ok(User {
        id: UserId(row.get("id")),
        email: row.get("email"),
        is_admin: row.get("is_admin"),
        created_at: parse_timestamp(&created_at)?,
    })
}

impl SqliteStorage {
    async fn fetch_package(&self, column: &str, value: String) -> Result<Option<Package>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM packages WHERE {} = ?",
            PACKAGE_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to get package: {}", e)))?;

        row.as_ref().map(package_from_row).transpose()
    }

    async fn fetch_user(&self, column: &str, value: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE {} = ?",
            USER_COLUMNS, column
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to get user: {}", e)))?;

        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl MetadataStorage for SqliteStorage {
    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>> {
        self.fetch_package("id", id.to_string()).await
    }

    async fn get_package_by_name(&self, name: &str) -> Result<Option<Package>> {
        self.fetch_package("name", name.to_string()).await
    }

    async fn list_packages(
        &self,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Package>, u64)> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM packages
            WHERE (?1 IS NULL OR instr(name, ?1) > 0)
            ORDER BY name
            LIMIT ?2 OFFSET ?3
            "#,
            PACKAGE_COLUMNS
        ))
        .bind(search)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to list packages: {}", e)))?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM packages WHERE (?1 IS NULL OR instr(name, ?1) > 0)")
                .bind(search)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| RegistryError::Storage(format!("Failed to count packages: {}", e)))?;

        let packages = rows.iter().map(package_from_row).collect::<Result<Vec<_>>>()?;
        Ok((packages, total as u64))
    }

    async fn create_package(&self, package: &Package, owner: &UserId) -> Result<()> {
        let created_at = format_timestamp(package.created_at)?;
        let updated_at = format_timestamp(package.updated_at)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO packages
            (id, name, description, is_discontinued, replaced_by, is_private, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(package.id.to_string())
        .bind(&package.name)
        .bind(&package.description)
        .bind(package.is_discontinued)
        .bind(&package.replaced_by)
        .bind(package.is_private)
        .bind(&created_at)
        .bind(&updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::PackageExists(package.name.clone())
            } else {
                RegistryError::Storage(format!("Failed to create package: {}", e))
            }
        })?;

        sqlx::query(
            "INSERT INTO package_uploaders (package_id, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(package.id.to_string())
        .bind(owner.as_ref())
        .bind(&created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to grant uploader: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to commit package: {}", e)))?;

        Ok(())
    }

    async fn update_package(&self, package: &Package) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE packages
            SET description = ?, is_discontinued = ?, replaced_by = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&package.description)
        .bind(package.is_discontinued)
        .bind(&package.replaced_by)
        .bind(format_timestamp(package.updated_at)?)
        .bind(package.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to update package: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::PackageNotFound(package.name.clone()));
        }
        Ok(())
    }

    async fn touch_package(
        &self,
        id: &PackageId,
        description: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE packages
            SET description = COALESCE(?, description), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(description)
        .bind(format_timestamp(updated_at)?)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to touch package: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RegistryError::PackageNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_versions(&self, package_id: &PackageId) -> Result<Vec<Version>> {
        // rowid follows insertion order
        let rows = sqlx::query(&format!(
            "SELECT {} FROM versions WHERE package_id = ? ORDER BY rowid DESC",
            VERSION_COLUMNS
        ))
        .bind(package_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to list versions: {}", e)))?;

        rows.iter().map(version_from_row).collect()
    }

    async fn get_version(&self, package_id: &PackageId, version: &str) -> Result<Option<Version>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM versions WHERE package_id = ? AND version = ?",
            VERSION_COLUMNS
        ))
        .bind(package_id.to_string())
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to get version: {}", e)))?;

        row.as_ref().map(version_from_row).transpose()
    }

    async fn insert_version(&self, version: &Version) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO versions
            (id, package_id, version, manifest, readme, changelog, archive_url, archive_sha256, is_retracted, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(version.id.to_string())
        .bind(version.package_id.to_string())
        .bind(&version.version)
        .bind(&version.manifest)
        .bind(&version.readme)
        .bind(&version.changelog)
        .bind(&version.archive_url)
        .bind(&version.archive_sha256)
        .bind(version.is_retracted)
        .bind(format_timestamp(version.created_at)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::VersionExists {
                    package: version.package_id.to_string(),
                    version: version.version.clone(),
                }
            } else {
                RegistryError::Storage(format!("Failed to insert version: {}", e))
            }
        })?;

        Ok(())
    }

    async fn set_version_retracted(
        &self,
        package_id: &PackageId,
        version: &str,
        retracted: bool,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE versions SET is_retracted = ? WHERE package_id = ? AND version = ?")
                .bind(retracted)
                .bind(package_id.to_string())
                .bind(version)
                .execute(&self.pool)
                .await
                .map_err(|e| RegistryError::Storage(format!("Failed to retract version: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO package_uploaders (package_id, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(package_id.to_string())
        .bind(user_id.as_ref())
        .bind(format_timestamp(OffsetDateTime::now_utc())?)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to add uploader: {}", e)))?;

        Ok(())
    }

    async fn delete_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM package_uploaders WHERE package_id = ? AND user_id = ?")
            .bind(package_id.to_string())
            .bind(user_id.as_ref())
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to remove uploader: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_uploaders(&self, package_id: &PackageId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM package_uploaders WHERE package_id = ?")
            .bind(package_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| RegistryError::Storage(format!("Failed to remove uploaders: {}", e)))?;

        Ok(result.rows_affected())
    }

    async fn list_uploaders(&self, package_id: &PackageId) -> Result<Vec<UserId>> {
        let user_ids: Vec<String> =
            sqlx::query_scalar("SELECT user_id FROM package_uploaders WHERE package_id = ?")
                .bind(package_id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(|e| RegistryError::Storage(format!("Failed to list uploaders: {}", e)))?;

        Ok(user_ids.into_iter().map(UserId).collect())
    }

    async fn has_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM package_uploaders WHERE package_id = ? AND user_id = ?",
        )
        .bind(package_id.to_string())
        .bind(user_id.as_ref())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to check uploader: {}", e)))?;

        Ok(count > 0)
    }

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        let details = entry.details.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO audit_logs
            (id, user_id, action, resource_type, resource_id, details, ip_address, user_agent, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.user_id.as_ref().map(|u| u.0.clone()))
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(format_timestamp(entry.created_at)?)
        .execute(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to insert audit entry: {}", e)))?;

        Ok(())
    }

    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage> {
        let user_id = query.user_id.as_ref().map(|u| u.0.clone());

        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_logs WHERE {} ORDER BY seq DESC LIMIT ?5 OFFSET ?6",
            AUDIT_COLUMNS, AUDIT_FILTER
        ))
        .bind(&user_id)
        .bind(&query.action)
        .bind(&query.resource_type)
        .bind(&query.resource_id)
        .bind(i64::from(query.limit))
        .bind(i64::from(query.offset))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistryError::Storage(format!("Failed to query audit log: {}", e)))?;

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM audit_logs WHERE {}", AUDIT_FILTER))
                .bind(&user_id)
                .bind(&query.action)
                .bind(&query.resource_type)
                .bind(&query.resource_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| RegistryError::Storage(format!("Failed to count audit log: {}", e)))?;

        Ok(AuditPage {
            entries: rows.iter().map(audit_from_row).collect::<Result<Vec<_>>>()?,
            total: total as u64,
        })
    }

    async fn insert_user(&self, user: &User, token_hash: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, email, is_admin, token_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id.as_ref())
        .bind(&user.email)
        .bind(user.is_admin)
        .bind(token_hash)
        .bind(format_timestamp(user.created_at)?)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RegistryError::UserExists(user.email.clone())
            } else {
                RegistryError::Storage(format!("Failed to insert user: {}", e))
            }
        })?;

        Ok(())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        self.fetch_user("id", id.as_ref()).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.fetch_user("email", email).await
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        self.fetch_user("token_hash", token_hash).await
    }
}
