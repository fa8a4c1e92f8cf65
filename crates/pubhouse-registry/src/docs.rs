//! Documentation generation for published versions
//!
//! Runs on the job queue after a publish. The job only reads the stored archive
//! and writes a JSON index next to it; registry metadata is never touched, so a
//! failing job cannot affect the publish that triggered it.

use async_trait::async_trait;
use bytes::Bytes;
use pubhouse::validate_archive;
use pubhouse_worker::{Job, JobError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;

use crate::address::ContentAddress;
use crate::storage::BlobStorage;

/// Kind tag of [`DocsJob`]
pub const DOCS_JOB_KIND: &str = "docs.generate";

/// Generated documentation index of one version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocsIndex {
    pub package: String,
    pub version: String,

    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,

    /// Public library files, `lib/**.dart` outside `lib/src/`
    pub libraries: Vec<String>,

    pub readme: Option<String>,
    pub file_count: usize,
}

impl DocsIndex {
    /// Build an index from the file listing of an archive
    pub fn build(package: &str, version: &str, files: &[String], readme: Option<String>) -> Self {
        let mut libraries: Vec<String> = files
            .iter()
            .filter(|path| is_public_library(path))
            .cloned()
            .collect();
        libraries.sort();

        Self {
            package: package.to_string(),
            version: version.to_string(),
            generated_at: OffsetDateTime::now_utc(),
            libraries,
            readme,
            file_count: files.len(),
        }
    }
}

fn is_public_library(path: &str) -> bool {
    path.starts_with("lib/") && !path.starts_with("lib/src/") && path.ends_with(".dart")
}

pub struct DocsJob {
    blobs: Arc<dyn BlobStorage>,
    package: String,
    version: String,
}

impl DocsJob {
    pub fn new(blobs: Arc<dyn BlobStorage>, package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            blobs,
            package: package.into(),
            version: version.into(),
        }
    }
}

#[async_trait]
impl Job for DocsJob {
    fn kind(&self) -> &'static str {
        DOCS_JOB_KIND
    }

    async fn execute(&mut self) -> Result<(), JobError> {
        let archive_key = ContentAddress::archive_key(&self.package, &self.version);
        let archive = self
            .blobs
            .get(&archive_key)
            .await
            .map_err(|e| JobError::new(format!("Failed to read {}: {}", archive_key, e)))?;

        let validated = tokio::task::spawn_blocking(move || validate_archive(&archive))
            .await
            .map_err(|e| JobError::new(format!("Archive scan panicked: {}", e)))?
            .map_err(|e| JobError::new(e.to_string()))?;

        let index = DocsIndex::build(
            &self.package,
            &self.version,
            &validated.files,
            validated.readme,
        );
        let body = serde_json::to_vec_pretty(&index).map_err(|e| JobError::new(e.to_string()))?;

        let docs_key = ContentAddress::docs_key(&self.package, &self.version);
        self.blobs
            .put(&docs_key, Bytes::from(body))
            .await
            .map_err(|e| JobError::new(format!("Failed to write {}: {}", docs_key, e)))?;

        info!(
            package = %self.package,
            version = %self.version,
            libraries = index.libraries.len(),
            "documentation generated"
        );
        Ok(())
    }
}
