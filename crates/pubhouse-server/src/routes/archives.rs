//! Archive downloads

use crate::{AppState, error::Result};
use axum::{
    Router,
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    routing::get,
};
use pubhouse_registry::RegistryError;

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Create download routes
pub fn router() -> Router<AppState> {
    Router::new().route("/{name}/versions/{file}", get(download_archive))
}

/// Serve `<version>.tar.gz` as an attachment
async fn download_archive(
    State(state): State<AppState>,
    Path((name, file)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let version = file
        .strip_suffix(ARCHIVE_SUFFIX)
        .ok_or_else(|| RegistryError::VersionNotFound {
            package: name.clone(),
            version: file.clone(),
        })?;

    let bytes = state.registry.fetch_archive(&name, version).await?;
    let disposition = format!("attachment; filename=\"{}-{}{}\"", name, version, ARCHIVE_SUFFIX);

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
