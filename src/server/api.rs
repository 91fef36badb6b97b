//! JSON endpoints for health checks and artifact housekeeping.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;
use crate::error::Error;
use crate::retention::{Artifact, list_artifacts, remove_artifact};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ArtifactsResponse {
    artifacts: Vec<Artifact>,
}

fn error_response(error: &Error) -> Response {
    let status = match error {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NameInUse { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("Artifact request failed: {error}");
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

pub async fn list(State(state): State<AppState>) -> Response {
    let root = state.sessions.storage_root();
    match list_artifacts(state.fs.as_ref(), root, state.sessions.active_names()).await {
        Ok(artifacts) => Json(ArtifactsResponse { artifacts }).into_response(),
        Err(e) => error_response(&e),
    }
}

pub async fn remove(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let root = state.sessions.storage_root();
    match remove_artifact(state.fs.as_ref(), root, &name, state.sessions.active_names()).await {
        Ok(true) => {
            log::info!("Removed artifact {name}");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => error_response(&e),
    }
}
