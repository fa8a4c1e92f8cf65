//! Server configuration management

use crate::error::{ApiError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Public URL clients reach the registry at
    pub base_url: String,

    /// Directory holding archives and generated docs
    pub storage_root: String,

    /// `sqlite:` URL, or `memory` for a throwaway registry
    pub database_url: String,

    /// Maximum number of background jobs running at once
    pub max_concurrent_jobs: usize,

    /// Upper bound on an uploaded archive
    pub max_upload_bytes: usize,

    /// Administrator created at startup if both are set
    pub admin_email: Option<String>,
    #[serde(skip_serializing)]
    pub admin_token: Option<String>,

    /// CORS allowed origins
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_var("PORT", defaults.port)?,
            base_url: std::env::var("PUBHOUSE_BASE_URL").unwrap_or(defaults.base_url),
            storage_root: std::env::var("PUBHOUSE_STORAGE_ROOT").unwrap_or(defaults.storage_root),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_concurrent_jobs: parse_var("PUBHOUSE_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs)?,
            max_upload_bytes: parse_var("PUBHOUSE_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            admin_email: non_empty_var("PUBHOUSE_ADMIN_EMAIL"),
            admin_token: non_empty_var("PUBHOUSE_ADMIN_TOKEN"),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    /// Whether metadata lives in process memory only
    pub fn uses_memory_database(&self) -> bool {
        self.database_url == "memory"
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            base_url: "http://localhost:3000".to_string(),
            storage_root: "./data/blobs".to_string(),
            database_url: "sqlite:./data/pubhouse.db".to_string(),
            max_concurrent_jobs: 1,
            max_upload_bytes: 100 * 1024 * 1024,
            admin_email: None,
            admin_token: None,
            cors_origins: vec!["*".to_string()],
        }
    }
}

fn parse_var<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ApiError::Config(format!("Invalid {} value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
