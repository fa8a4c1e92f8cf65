//! Package publishing and lookup routes

use crate::{
    AppState,
    auth::{Authenticated, Client},
    error::{ApiError, Result},
    models::{
        ApiResponse, DiscontinueRequest, PackageEntry, PackageSummaryEntry, PaginatedResponse,
        SearchQuery, UploadResponse, UploadersResponse, VersionEntry, clamp_limit,
    },
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, post, put},
};
use bytes::Bytes;
use pubhouse_registry::DocsIndex;
use tracing::{debug, info};

/// Create package routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_packages))
        .route("/versions/newUpload", post(upload_package))
        .route("/{name}", get(get_package))
        .route("/{name}/discontinue", put(discontinue_package))
        .route("/{name}/uploaders", get(list_uploaders))
        .route("/{name}/versions/{version}", get(get_version))
        .route("/{name}/versions/{version}/docs", get(get_docs))
        .route("/{name}/versions/{version}/retract", put(retract_version))
}

/// Publish an archive sent as the raw request body
async fn upload_package(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Client(client): Client,
    body: Bytes,
) -> Result<Json<UploadResponse>> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Request body must contain a package archive"));
    }
    debug!(user_id = %actor.user_id, size = body.len(), "upload received");

    let receipt = state.registry.publish(body, &actor, &client).await?;
    info!(
        package = %receipt.package.name,
        version = %receipt.version.version,
        "upload accepted"
    );

    Ok(Json(UploadResponse::new(receipt.message())))
}

/// List packages with their latest version
async fn list_packages(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<PaginatedResponse<PackageSummaryEntry>>> {
    debug!("Listing packages with query: {:?}", query);

    let limit = clamp_limit(query.limit);
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let (packages, total) = state
        .registry
        .list_packages(search, limit, query.offset)
        .await?;

    let entries = packages.into_iter().map(PackageSummaryEntry::from).collect();
    Ok(Json(PaginatedResponse::new(entries, limit, query.offset, total)))
}

async fn get_package(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PackageEntry>> {
    let details = state.registry.package_details(&name).await?;
    Ok(Json(PackageEntry::from(details)))
}

async fn get_version(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<VersionEntry>> {
    let version = state.registry.get_version(&name, &version).await?;
    Ok(Json(VersionEntry::from(version)))
}

/// Generated documentation index; 404 until the docs job has run
async fn get_docs(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<DocsIndex>> {
    Ok(Json(state.registry.fetch_docs(&name, &version).await?))
}

async fn retract_version(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Client(client): Client,
    Path((name, version)): Path<(String, String)>,
) -> Result<Json<VersionEntry>> {
    let retracted = state
        .registry
        .retract_version(&name, &version, &actor, &client)
        .await?;
    Ok(Json(VersionEntry::from(retracted)))
}

async fn discontinue_package(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Client(client): Client,
    Path(name): Path<String>,
    Json(request): Json<DiscontinueRequest>,
) -> Result<Json<ApiResponse<PackageEntry>>> {
    state
        .registry
        .discontinue_package(&name, request.replaced_by, &actor, &client)
        .await?;

    let details = state.registry.package_details(&name).await?;
    Ok(Json(ApiResponse::with_message(
        PackageEntry::from(details),
        format!("Package {} discontinued.", name),
    )))
}

async fn list_uploaders(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<UploadersResponse>> {
    let users = state.registry.list_uploaders(&name).await?;
    Ok(Json(UploadersResponse::from(users)))
}
