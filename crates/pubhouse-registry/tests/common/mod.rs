#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use pubhouse_registry::*;
use pubhouse_worker::{JobEvent, JobId, JobQueue, QueueConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tar::{Builder, Header};
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Gzipped tar with the given (path, content) entries
pub fn build_archive(files: &[(&str, &str)]) -> Bytes {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = Builder::new(encoder);

    for (path, content) in files {
        let mut header = Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append(&header, content.as_bytes()).unwrap();
    }

    Bytes::from(tar.into_inner().unwrap().finish().unwrap())
}

/// A well-formed package archive
pub fn package_archive(name: &str, version: &str) -> Bytes {
    package_archive_with_readme(name, version, &format!("# {}", name))
}

pub fn package_archive_with_readme(name: &str, version: &str, readme: &str) -> Bytes {
    let pubspec = format!(
        "name: {}\nversion: {}\ndescription: The {} package\n",
        name, version, name
    );
    build_archive(&[
        ("pubspec.yaml", &pubspec),
        ("README.md", readme),
        ("lib/widgets.dart", "library widgets;"),
        ("lib/src/impl.dart", "part of widgets;"),
    ])
}

pub struct TestRegistry {
    pub registry: Arc<Registry>,
    pub metadata: Arc<dyn MetadataStorage>,
    pub blobs: Arc<MemoryStorage>,
}

pub fn memory_registry() -> TestRegistry {
    registry_with(Arc::new(MemoryMetadataStorage::new()))
}

pub fn registry_with(metadata: Arc<dyn MetadataStorage>) -> TestRegistry {
    let blobs = Arc::new(MemoryStorage::new());
    let registry = Registry::new(
        RegistryConfig {
            base_url: "https://pub.example.com".to_string(),
        },
        metadata.clone(),
        blobs.clone(),
        JobQueue::new(QueueConfig::default()),
    );

    TestRegistry {
        registry: Arc::new(registry),
        metadata,
        blobs,
    }
}

/// Registry over arbitrary storage backends
pub fn registry_with_storage(
    metadata: Arc<dyn MetadataStorage>,
    blobs: Arc<dyn BlobStorage>,
) -> Arc<Registry> {
    Arc::new(Registry::new(
        RegistryConfig {
            base_url: "https://pub.example.com".to_string(),
        },
        metadata,
        blobs,
        JobQueue::new(QueueConfig::default()),
    ))
}

/// In-memory blobs whose writes take a while, widening the window between a
/// publish's checks and its metadata writes
pub struct SlowBlobs {
    inner: MemoryStorage,
    delay: Duration,
}

impl SlowBlobs {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemoryStorage::new(),
            delay,
        }
    }
}

#[async_trait]
impl BlobStorage for SlowBlobs {
    async fn put(&self, key: &str, data: Bytes) -> std::result::Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put(key, data).await
    }

    async fn put_if_absent(
        &self,
        key: &str,
        data: Bytes,
    ) -> std::result::Result<(), StorageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.put_if_absent(key, data).await
    }

    async fn get(&self, key: &str) -> std::result::Result<Bytes, StorageError> {
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> std::result::Result<bool, StorageError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StorageError> {
        self.inner.list(prefix).await
    }
}

/// In-memory metadata with switches for slow version lookups, a stale package
/// lookup and a broken audit table
#[derive(Default)]
pub struct FlakyMetadata {
    inner: MemoryMetadataStorage,
    version_lookup_delay_ms: AtomicU64,
    stale_package_lookup: AtomicBool,
    audit_down: AtomicBool,
}

impl FlakyMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay_version_lookups(&self, delay: Duration) {
        self.version_lookup_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The next lookup by name reports no package, as if it ran just before
    /// another publish created it
    pub fn hide_package_once(&self) {
        self.stale_package_lookup.store(true, Ordering::SeqCst);
    }

    pub fn break_audit_log(&self) {
        self.audit_down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataStorage for FlakyMetadata {
    async fn get_package(&self, id: &PackageId) -> Result<Option<Package>> {
        self.inner.get_package(id).await
    }

    async fn get_package_by_name(&self, name: &str) -> Result<Option<Package>> {
        if self.stale_package_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.get_package_by_name(name).await
    }

    async fn list_packages(
        &self,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Package>, u64)> {
        self.inner.list_packages(search, limit, offset).await
    }

    async fn create_package(&self, package: &Package, owner: &UserId) -> Result<()> {
        self.inner.create_package(package, owner).await
    }

    async fn update_package(&self, package: &Package) -> Result<()> {
        self.inner.update_package(package).await
    }

    async fn touch_package(
        &self,
        id: &PackageId,
        description: Option<&str>,
        updated_at: OffsetDateTime,
    ) -> Result<()> {
        self.inner.touch_package(id, description, updated_at).await
    }

    async fn list_versions(&self, package_id: &PackageId) -> Result<Vec<Version>> {
        self.inner.list_versions(package_id).await
    }

    async fn get_version(&self, package_id: &PackageId, version: &str) -> Result<Option<Version>> {
        let delay = self.version_lookup_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.get_version(package_id, version).await
    }

    async fn insert_version(&self, version: &Version) -> Result<()> {
        self.inner.insert_version(version).await
    }

    async fn set_version_retracted(
        &self,
        package_id: &PackageId,
        version: &str,
        retracted: bool,
    ) -> Result<bool> {
        self.inner
            .set_version_retracted(package_id, version, retracted)
            .await
    }

    async fn insert_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<()> {
        self.inner.insert_uploader(package_id, user_id).await
    }

    async fn delete_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        self.inner.delete_uploader(package_id, user_id).await
    }

    async fn delete_uploaders(&self, package_id: &PackageId) -> Result<u64> {
        self.inner.delete_uploaders(package_id).await
    }

    async fn list_uploaders(&self, package_id: &PackageId) -> Result<Vec<UserId>> {
        self.inner.list_uploaders(package_id).await
    }

    async fn has_uploader(&self, package_id: &PackageId, user_id: &UserId) -> Result<bool> {
        self.inner.has_uploader(package_id, user_id).await
    }

    async fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        if self.audit_down.load(Ordering::SeqCst) {
            return Err(RegistryError::Storage("audit table unavailable".into()));
        }
        self.inner.insert_audit_entry(entry).await
    }

    async fn query_audit_entries(&self, query: &AuditQuery) -> Result<AuditPage> {
        self.inner.query_audit_entries(query).await
    }

    async fn insert_user(&self, user: &User, token_hash: &str) -> Result<()> {
        self.inner.insert_user(user, token_hash).await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.inner.get_user_by_email(email).await
    }

    async fn get_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>> {
        self.inner.get_user_by_token_hash(token_hash).await
    }
}

pub async fn user(registry: &Registry, name: &str) -> Actor {
    let user = registry
        .create_user(&format!("{}@example.com", name), false, &format!("{}-token", name))
        .await
        .unwrap();
    Actor::from(&user)
}

pub async fn admin(registry: &Registry) -> Actor {
    let user = registry
        .create_user("admin@example.com", true, "admin-token")
        .await
        .unwrap();
    Actor::from(&user)
}

pub fn client() -> ClientInfo {
    ClientInfo {
        ip_address: Some("10.0.0.7".to_string()),
        user_agent: Some("dart pub 3.4.0".to_string()),
    }
}

/// Poll until the detached audit writes have landed
pub async fn wait_for_audit(registry: &Registry, count: u64) -> AuditPage {
    let query = AuditQuery {
        limit: 100,
        ..Default::default()
    };

    for _ in 0..100 {
        let page = registry.audit().query(&query).await.unwrap();
        if page.total >= count {
            return page;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("audit log never reached {} entries", count);
}

/// Wait for a job to reach a terminal state
pub async fn wait_for_job(events: &mut broadcast::Receiver<JobEvent>, id: JobId) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.unwrap();
            if event.id() == id && event.is_terminal() {
                return event;
            }
        }
    })
    .await
    .expect("job did not finish in time")
}
