//! Common API types and utilities
use serde::{Deserialize, Serialize};

/// Largest page a client may request
pub const MAX_PAGE_SIZE: u32 = 100;

pub(crate) fn default_limit() -> u32 {
    50
}

/// Clamp a requested page size to `1..=MAX_PAGE_SIZE`
pub fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_SIZE)
}

/// Standard pagination response
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationInfo,
}

/// Pagination metadata
#[derive(Debug, Serialize)]
pub struct PaginationInfo {
    pub limit: u32,
    pub offset: u32,
    pub total: u64,
    pub has_more: bool,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, limit: u32, offset: u32, total: u64) -> Self {
        let has_more = (offset as u64) + (data.len() as u64) < total;

        Self {
            data,
            pagination: PaginationInfo {
                limit,
                offset,
                total,
                has_more,
            },
        }
    }
}

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: String) -> Self {
        Self {
            data,
            message: Some(message),
        }
    }
}

/// Package listing filters
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    /// Substring matched against package names
    pub search: Option<String>,

    #[serde(default = "default_limit")]
    pub limit: u32,

    #[serde(default)]
    pub offset: u32,
}

/// Response body of a successful upload, in the shape `dart pub` expects
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: UploadMessage,
}

#[derive(Debug, Serialize)]
pub struct UploadMessage {
    pub message: String,
}

impl UploadResponse {
    pub fn new(message: String) -> Self {
        Self {
            success: UploadMessage { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_more() {
        let page = PaginatedResponse::new(vec![1, 2], 2, 0, 3);
        assert!(page.pagination.has_more);

        let page = PaginatedResponse::new(vec![3], 2, 2, 3);
        assert!(!page.pagination.has_more);
    }

    #[test]
    fn test_limit_is_clamped() {
        assert_eq!(clamp_limit(10_000), MAX_PAGE_SIZE);
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(20), 20);
    }
}
