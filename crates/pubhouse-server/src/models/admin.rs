//! Administrator API models

use pubhouse_registry::{AuditQuery, UserId};
use serde::Deserialize;

use super::api::{clamp_limit, default_limit};

/// Body of an uploader replacement
#[derive(Debug, Deserialize)]
pub struct SetUploadersRequest {
    /// Emails of the complete desired uploader set
    pub uploaders: Vec<String>,
}

/// Audit log filters
#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,

    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default)]
    pub offset: u32,
}

impl From<AuditLogQuery> for AuditQuery {
    fn from(q: AuditLogQuery) -> Self {
        AuditQuery {
            user_id: q.user_id.map(UserId::from),
            action: q.action,
            resource_type: q.resource_type,
            resource_id: q.resource_id,
            limit: clamp_limit(q.limit),
            offset: q.offset,
        }
    }
}
