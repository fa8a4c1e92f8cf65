//! Pubhouse HTTP API Server
//!
//! Serves the pub-compatible publish and download endpoints, package lookups and
//! the administrator surface of a pubhouse registry.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    response::Json,
    routing::get,
};
use pubhouse_registry::{
    FileSystemStorage, MemoryMetadataStorage, MetadataStorage, Registry, RegistryConfig,
    RegistryError, SqliteStorage,
};
use pubhouse_worker::{JobQueue, QueueConfig};
use serde_json::{Value, json};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod worker;

use config::ServerConfig;
use error::Result;

/// Main application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: ServerConfig,
}

impl AppState {
    /// Open storage and the job queue described by the configuration
    pub async fn from_config(config: ServerConfig) -> Result<Self> {
        let metadata: Arc<dyn MetadataStorage> = if config.uses_memory_database() {
            info!("Using in-memory metadata storage");
            Arc::new(MemoryMetadataStorage::new())
        } else {
            info!(database_url = %config.database_url, "Opening SQLite metadata storage");
            Arc::new(SqliteStorage::new(&config.database_url).await?)
        };

        let blobs = FileSystemStorage::new(&config.storage_root)
            .await
            .map_err(RegistryError::from)?;
        info!(root = %config.storage_root, "Blob storage ready");

        let jobs = JobQueue::new(QueueConfig {
            max_concurrency: config.max_concurrent_jobs.max(1),
            ..QueueConfig::default()
        });

        let registry = Registry::new(
            RegistryConfig {
                base_url: config.base_url.clone(),
            },
            metadata,
            Arc::new(blobs),
            jobs,
        );

        Ok(Self {
            registry: Arc::new(registry),
            config,
        })
    }

    /// Create the configured administrator if it does not exist yet
    pub async fn bootstrap_admin(&self) -> Result<()> {
        if let (Some(email), Some(token)) = (&self.config.admin_email, &self.config.admin_token) {
            let admin = self.registry.ensure_user(email, true, token).await?;
            if !admin.is_admin {
                tracing::warn!(email = %email, "configured admin exists without admin rights");
            }
            info!(email = %email, "Administrator available");
        }
        Ok(())
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // API routes
        .nest("/api", api_routes())
        // Archive downloads
        .nest("/packages", routes::archives::router())
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

/// API routes
fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/packages", routes::packages::router())
        .nest("/admin", routes::admin::router())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Health check endpoint
async fn health_check() -> Json<Value> {
    let timestamp = time::OffsetDateTime::now_utc().format(&Rfc3339).ok();

    Json(json!({
        "status": "healthy",
        "service": "pubhouse-server",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": timestamp
    }))
}
