//! Administrator routes

use crate::{
    AppState,
    auth::{Authenticated, Client},
    error::Result,
    models::{AuditLogQuery, PaginatedResponse, SetUploadersRequest, UploadersResponse},
};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, put},
};
use pubhouse_registry::{AuditEntry, AuditQuery};

/// Create admin routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/packages/{name}/uploaders", put(set_uploaders))
        .route("/audit-logs", get(audit_logs))
}

/// Replace the uploader set of a package
async fn set_uploaders(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Client(client): Client,
    Path(name): Path<String>,
    Json(request): Json<SetUploadersRequest>,
) -> Result<Json<UploadersResponse>> {
    let users = state
        .registry
        .set_uploaders(&name, &request.uploaders, &actor, &client)
        .await?;
    Ok(Json(UploadersResponse::from(users)))
}

async fn audit_logs(
    State(state): State<AppState>,
    Authenticated(actor): Authenticated,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<PaginatedResponse<AuditEntry>>> {
    let query = AuditQuery::from(query);
    let page = state.registry.query_audit(&query, &actor).await?;

    Ok(Json(PaginatedResponse::new(
        page.entries,
        query.limit,
        query.offset,
        page.total,
    )))
}
