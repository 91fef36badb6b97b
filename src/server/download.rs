//! Allow-listed archive downloads.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::registry::validate_directory_name;
use crate::retention::archive_path;

/// Streams `<root>/<name>.zip` as an attachment.
///
/// Only `<name>.zip` where `name` passes the destination name rules is
/// served, and only when it is a regular file directly under the storage
/// root (symlinks are refused). Other paths are 404, malformed archive names
/// are 400.
pub async fn download_archive(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    let Some(name) = filename.strip_suffix(".zip") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if validate_directory_name(name).is_err() {
        return (StatusCode::BAD_REQUEST, "Invalid archive name").into_response();
    }

    let path = archive_path(state.sessions.storage_root(), name);
    let size = match tokio::fs::symlink_metadata(&path).await {
        Ok(metadata) if metadata.file_type().is_file() => metadata.len(),
        _ => return StatusCode::NOT_FOUND.into_response(),
    };
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            log::warn!("Cannot open {}: {e}", path.display());
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    log::info!("Serving {filename} ({size} bytes)");
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
        (header::CONTENT_LENGTH, size.to_string()),
    ];
    (headers, Body::from_stream(ReaderStream::new(file))).into_response()
}
