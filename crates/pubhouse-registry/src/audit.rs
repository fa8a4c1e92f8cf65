//! Append-only audit trail of registry mutations

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::entities::{AuditEntry, AuditPage, AuditQuery};
use crate::error::Result;
use crate::storage::MetadataStorage;

#[derive(Clone)]
pub struct AuditRecorder {
    storage: Arc<dyn MetadataStorage>,
}

impl AuditRecorder {
    pub fn new(storage: Arc<dyn MetadataStorage>) -> Self {
        Self { storage }
    }

    /// Append an entry and wait for it to be stored
    pub async fn record(&self, entry: AuditEntry) -> Result<()> {
        self.storage.insert_audit_entry(&entry).await?;
        debug!(action = %entry.action, resource_id = %entry.resource_id, "audit entry recorded");
        Ok(())
    }

    /// Append an entry from a detached task
    ///
    /// The caller does not wait for the write. A failure is logged and otherwise
    /// dropped; it never reaches the operation being audited.
    pub fn record_detached(&self, entry: AuditEntry) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move {
            let action = entry.action.clone();
            let resource_id = entry.resource_id.clone();
            if let Err(e) = recorder.record(entry).await {
                error!(%action, %resource_id, error = %e, "failed to record audit entry");
            }
        })
    }

    pub async fn query(&self, query: &AuditQuery) -> Result<AuditPage> {
        self.storage.query_audit_entries(query).await
    }
}
