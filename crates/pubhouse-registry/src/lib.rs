//! # Pubhouse Registry
//!
//! Storage, permissions and the publish pipeline of a private package registry:
//! - Immutable package versions keyed by name and semantic version
//! - Uploader grants per package, with an administrator bypass
//! - Append-only audit log of every mutation
//! - Documentation generation on a background job queue
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use pubhouse_registry::*;
//! use pubhouse_worker::{JobQueue, QueueConfig};
//! use std::sync::Arc;
//!
//! # async fn example(archive: Bytes) -> Result<()> {
//! let registry = Registry::new(
//!     RegistryConfig::default(),
//!     Arc::new(MemoryMetadataStorage::new()),
//!     Arc::new(MemoryStorage::new()),
//!     JobQueue::new(QueueConfig::default()),
//! );
//!
//! let alice = registry.create_user("alice@example.com", false, "alice-token").await?;
//! let receipt = registry
//!     .publish(archive, &Actor::from(&alice), &ClientInfo::default())
//!     .await?;
//!
//! println!("{}", receipt.message());
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod audit;
pub mod docs;
pub mod entities;
pub mod error;
pub mod registry;
pub mod storage;
pub mod uploaders;
pub mod versions;

pub use address::ContentAddress;
pub use audit::AuditRecorder;
pub use docs::{DOCS_JOB_KIND, DocsIndex, DocsJob};
pub use entities::*;
pub use error::{ErrorKind, RegistryError, Result};
pub use registry::{
    PackageDetails, PackageSummary, PublishReceipt, PublishStage, Registry, RegistryConfig,
};
pub use storage::{
    BlobStorage, FileSystemStorage, MemoryMetadataStorage, MemoryStorage, MetadataStorage,
    StorageError,
};
pub use uploaders::{UploaderAuthority, UploaderChanges};
pub use versions::{VersionRepository, latest_version};

#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
