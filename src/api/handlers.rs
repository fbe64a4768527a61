use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::middleware::VersioningState;
use crate::logic::openapi::{get_available_versions, get_versioned_openapi};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: &str) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub latest_version: Option<String>,
}

pub async fn health_check(State(state): State<Arc<VersioningState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        latest_version: state.latest_version().cloned(),
    })
}

#[derive(Debug, Serialize)]
pub struct VersionsResponse {
    pub versions: Vec<String>,
    pub latest: Option<String>,
}

/// All versions the migration chain can serve, oldest first.
pub async fn list_versions(State(state): State<Arc<VersioningState>>) -> Json<VersionsResponse> {
    Json(VersionsResponse {
        versions: get_available_versions(&state.migrations),
        latest: state.latest_version().cloned(),
    })
}

/// The OpenAPI document for the requested version, resolved through the same
/// header/query/default mechanics as the middleware.
pub async fn get_openapi_spec(
    State(state): State<Arc<VersioningState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let requested = headers
        .get(&state.settings.version_header)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| params.get(&state.settings.version_query_param).cloned())
        .unwrap_or_else(|| state.settings.default_version.clone());

    let version = match state.resolve_version(&requested) {
        Some(version) => version,
        // fall through with the raw request so the error names what the
        // client actually asked for
        None => requested,
    };

    match get_versioned_openapi(&state.migrations, &version, &state.base_openapi) {
        Ok(doc) => Ok(Json(doc)),
        Err(err) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(&err.to_string())),
        )),
    }
}
