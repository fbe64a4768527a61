use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::handlers::ErrorResponse;
use crate::config::VersioningConfig;
use crate::logic::chain::{get_api_state_at_version, get_latest_version};
use crate::logic::path_rewrite::{get_path_rewrites_for_upgrade, match_path_pattern, rewrite_path};
use crate::logic::transform::{transform_request, transform_response, transform_response_list};
use crate::model::{
    ApiVersion, HttpMethod, JsonObject, LoadedMigration, PathOperation, QueryParams, QueryValue,
    Version,
};

/// Version info the middleware attaches to every versioned request, for use
/// by handlers.
#[derive(Debug, Clone)]
pub struct RequestVersion {
    pub resolved: Version,
    pub latest: Version,
}

/// Load-once handle for the versioning middleware: the migration chain, the
/// middleware settings, and a cache of derived snapshots. Constructed once at
/// startup and shared across requests; snapshot derivation is pure, so cached
/// entries never invalidate.
pub struct VersioningState {
    pub settings: VersioningConfig,
    pub migrations: Vec<LoadedMigration>,
    pub base_openapi: Value,
    state_cache: RwLock<HashMap<Version, Arc<ApiVersion>>>,
}

impl VersioningState {
    pub fn new(settings: VersioningConfig, migrations: Vec<LoadedMigration>) -> Self {
        Self {
            settings,
            migrations,
            base_openapi: serde_json::json!({
                "openapi": "3.1.0",
                "info": {"title": "API", "version": "1.0.0"},
            }),
            state_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_base_openapi(mut self, base_openapi: Value) -> Self {
        self.base_openapi = base_openapi;
        self
    }

    pub fn latest_version(&self) -> Option<&Version> {
        get_latest_version(&self.migrations)
    }

    /// Resolve "latest" to the chain head and reject versions the chain does
    /// not know.
    pub fn resolve_version(&self, requested: &str) -> Option<Version> {
        if requested == "latest" {
            return self.latest_version().cloned();
        }
        self.migrations
            .iter()
            .find(|m| m.to_version == requested)
            .map(|m| m.to_version.clone())
    }

    /// The API state at a version, derived once and cached.
    pub async fn api_state_at(&self, version: &str) -> Option<Arc<ApiVersion>> {
        if let Some(state) = self.state_cache.read().await.get(version) {
            return Some(state.clone());
        }
        let derived = Arc::new(get_api_state_at_version(&self.migrations, version)?);
        self.state_cache
            .write()
            .await
            .insert(version.to_string(), derived.clone());
        Some(derived)
    }

    /// The requested version: header first, then query param, then default.
    pub fn extract_version(&self, request: &Request) -> String {
        if let Some(version) = request
            .headers()
            .get(&self.settings.version_header)
            .and_then(|v| v.to_str().ok())
        {
            if !version.is_empty() {
                return version.to_string();
            }
        }
        if let Some(query) = request.uri().query() {
            for (key, value) in parse_query_pairs(query) {
                if key == self.settings.version_query_param && !value.is_empty() {
                    return value;
                }
            }
        }
        self.settings.default_version.clone()
    }
}

/// axum middleware implementing the versioned request lifecycle: resolve the
/// requested version, rewrite renamed paths, upgrade the request to the
/// current version, dispatch, and downgrade the JSON response to the
/// requested version.
pub async fn versioned_api_middleware(
    State(state): State<Arc<VersioningState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !path.starts_with(&state.settings.api_prefix) || state.migrations.is_empty() {
        return next.run(request).await;
    }

    let requested = state.extract_version(&request);
    let Some(resolved) = state.resolve_version(&requested) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&format!(
                "Unknown API version: {}",
                requested
            ))),
        )
            .into_response();
    };
    let Some(latest) = state.latest_version().cloned() else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("No API versions available")),
        )
            .into_response();
    };

    let mut request = request;
    request.extensions_mut().insert(RequestVersion {
        resolved: resolved.clone(),
        latest: latest.clone(),
    });

    if resolved == latest {
        return next.run(request).await;
    }

    let Some(method) = HttpMethod::parse(request.method().as_str()) else {
        return next.run(request).await;
    };

    // operation metadata as it existed at the requested version, located by
    // the path the client actually sent (renames move it afterwards)
    let api_path = strip_api_prefix(request.uri().path(), &state.settings.api_prefix).to_string();
    let operation = match state.api_state_at(&resolved).await {
        Some(snapshot) => find_operation(&snapshot, &api_path, method),
        None => None,
    };

    // old clients may still use pre-rename URLs
    request = rewrite_request_path(&state, request, &resolved, &latest, method);

    let Some(operation) = operation else {
        return next.run(request).await;
    };

    let request = upgrade_request(&state, request, &operation, &resolved, &latest).await;

    let response = next.run(request).await;

    downgrade_response(&state, response, &operation, &latest, &resolved).await
}

fn rewrite_request_path(
    state: &VersioningState,
    request: Request,
    from_version: &str,
    to_version: &str,
    method: HttpMethod,
) -> Request {
    let rewrites = get_path_rewrites_for_upgrade(&state.migrations, from_version, to_version);
    if rewrites.is_empty() {
        return request;
    }

    let prefix = state.settings.api_prefix.trim_end_matches('/');
    let path = request.uri().path();
    let api_path = strip_api_prefix(path, &state.settings.api_prefix);
    let new_api_path = rewrite_path(api_path, method, &rewrites);
    if new_api_path == api_path {
        return request;
    }

    let new_path = format!("{}{}", prefix, new_api_path);
    log::debug!("rewriting request path {} -> {}", path, new_path);
    replace_uri(request, &new_path, None)
}

/// Upgrade the request body and query params from the client's version to the
/// current one, rebuilding the request around the transformed values.
async fn upgrade_request(
    state: &VersioningState,
    request: Request,
    operation: &PathOperation,
    from_version: &str,
    to_version: &str,
) -> Request {
    let (mut parts, body) = request.into_parts();

    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("application/json"));

    let bytes = to_bytes(body, usize::MAX).await.unwrap_or_default();
    let body_obj: Option<JsonObject> = if is_json && !bytes.is_empty() {
        serde_json::from_slice::<Value>(&bytes)
            .ok()
            .and_then(|v| match v {
                Value::Object(obj) => Some(obj),
                _ => None,
            })
    } else {
        None
    };

    let query_params = parts
        .uri
        .query()
        .map(collect_query_params)
        .unwrap_or_default();

    let (new_body, new_params) = transform_request(
        body_obj,
        query_params.clone(),
        operation,
        &state.migrations,
        from_version,
        to_version,
    )
    .await;

    let final_bytes = match &new_body {
        Some(obj) => {
            // body is re-serialized, so the original length no longer holds
            parts.headers.remove(header::CONTENT_LENGTH);
            axum::body::Bytes::from(serde_json::to_vec(obj).unwrap_or_else(|_| bytes.to_vec()))
        }
        None => bytes,
    };

    if new_params != query_params {
        let path = parts.uri.path().to_string();
        let query = encode_query_params(&new_params);
        let request = Request::from_parts(parts, Body::from(final_bytes));
        return replace_uri(request, &path, Some(&query));
    }

    Request::from_parts(parts, Body::from(final_bytes))
}

/// Downgrade a JSON response from the current version to the client's.
/// Non-JSON responses pass through untouched.
async fn downgrade_response(
    state: &VersioningState,
    response: Response,
    operation: &PathOperation,
    from_version: &str,
    to_version: &str,
) -> Response {
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (parts, body) = response.into_parts();
    let Ok(bytes) = to_bytes(body, usize::MAX).await else {
        return Response::from_parts(parts, Body::empty());
    };
    let Ok(data) = serde_json::from_slice::<Value>(&bytes) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    let status = parts.status.as_u16();
    let transformed = match data {
        Value::Array(items) => Value::Array(
            transform_response_list(
                items,
                status,
                operation,
                &state.migrations,
                from_version,
                to_version,
            )
            .await,
        ),
        other => {
            transform_response(
                other,
                status,
                operation,
                &state.migrations,
                from_version,
                to_version,
            )
            .await
        }
    };

    let mut new_response = (parts.status, Json(transformed)).into_response();
    for (name, value) in parts.headers.iter() {
        if *name != header::CONTENT_TYPE && *name != header::CONTENT_LENGTH {
            new_response.headers_mut().insert(name.clone(), value.clone());
        }
    }
    new_response
}

/// Locate the operation a concrete request path resolves to within a
/// snapshot, matching `{param}` template segments.
pub fn find_operation(
    snapshot: &ApiVersion,
    api_path: &str,
    method: HttpMethod,
) -> Option<PathOperation> {
    for (template, operations) in &snapshot.path_operations {
        if match_path_pattern(template, api_path).is_some() {
            if let Some(op) = operations.iter().find(|op| op.method == method) {
                return Some(op.clone());
            }
        }
    }
    None
}

/// "/api/people/1" with prefix "/api/" -> "/people/1".
fn strip_api_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    let trimmed = prefix.trim_end_matches('/');
    match path.strip_prefix(trimmed) {
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Swap the request URI for a new path and query. `Some("")` clears the query
/// string; `None` keeps whatever the request already carried.
fn replace_uri(request: Request, path: &str, query: Option<&str>) -> Request {
    let (mut parts, body) = request.into_parts();
    let path_and_query = match query {
        Some("") => path.to_string(),
        Some(query) => format!("{}?{}", path, query),
        None => match parts.uri.query() {
            Some(existing) => format!("{}?{}", path, existing),
            None => path.to_string(),
        },
    };
    if let Ok(uri) = path_and_query.parse::<Uri>() {
        parts.uri = uri;
    }
    Request::from_parts(parts, body)
}

fn parse_query_pairs(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// Group raw query pairs into the transformer-facing map, folding repeated
/// keys into multi-values.
fn collect_query_params(query: &str) -> QueryParams {
    let mut params = QueryParams::new();
    for (key, value) in parse_query_pairs(query) {
        match params.remove(&key) {
            None => {
                params.insert(key, QueryValue::Single(value));
            }
            Some(QueryValue::Single(existing)) => {
                params.insert(key, QueryValue::Many(vec![existing, value]));
            }
            Some(QueryValue::Many(mut values)) => {
                values.push(value);
                params.insert(key, QueryValue::Many(values));
            }
        }
    }
    params
}

fn encode_query_params(params: &QueryParams) -> String {
    let mut pairs: Vec<String> = Vec::new();
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    for key in keys {
        match &params[key] {
            QueryValue::Single(value) => pairs.push(format!("{}={}", key, value)),
            QueryValue::Many(values) => {
                for value in values {
                    pairs.push(format!("{}={}", key, value));
                }
            }
        }
    }
    pairs.join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VersionDelta;
    use serde_json::json;

    fn make_migration(sequence: u32, from_version: Option<&str>, to_version: &str) -> LoadedMigration {
        LoadedMigration {
            sequence,
            slug: format!("m{}", sequence),
            dependencies: vec![],
            from_version: from_version.map(String::from),
            to_version: to_version.to_string(),
            delta: VersionDelta::default(),
            data_migrations: None,
        }
    }

    fn make_state() -> VersioningState {
        VersioningState::new(
            VersioningConfig::default(),
            vec![
                make_migration(1, None, "v1"),
                make_migration(2, Some("v1"), "v2"),
            ],
        )
    }

    #[test]
    fn test_resolve_version() {
        let state = make_state();
        assert_eq!(state.resolve_version("latest").as_deref(), Some("v2"));
        assert_eq!(state.resolve_version("v1").as_deref(), Some("v1"));
        assert!(state.resolve_version("v99").is_none());
    }

    #[test]
    fn test_extract_version_header_beats_query_and_default() {
        let state = make_state();

        let request = Request::builder()
            .uri("/api/people?api_version=v1")
            .header("X-API-Version", "v2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(state.extract_version(&request), "v2");

        let request = Request::builder()
            .uri("/api/people?api_version=v1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(state.extract_version(&request), "v1");

        let request = Request::builder()
            .uri("/api/people")
            .body(Body::empty())
            .unwrap();
        assert_eq!(state.extract_version(&request), "latest");
    }

    #[test]
    fn test_strip_api_prefix() {
        assert_eq!(strip_api_prefix("/api/people/1", "/api/"), "/people/1");
        assert_eq!(strip_api_prefix("/other/people", "/api/"), "/other/people");
    }

    #[test]
    fn test_collect_and_encode_query_params_round_trip() {
        let params = collect_query_params("tag=a&tag=b&limit=10");
        assert_eq!(
            params.get("tag"),
            Some(&QueryValue::Many(vec!["a".to_string(), "b".to_string()]))
        );
        assert_eq!(params.get("limit"), Some(&QueryValue::Single("10".to_string())));
        assert_eq!(encode_query_params(&params), "limit=10&tag=a&tag=b");
    }

    #[test]
    fn test_find_operation_matches_templates() {
        let op = PathOperation {
            method: HttpMethod::Get,
            path: "/people/{person_id}".to_string(),
            query_params: HashMap::new(),
            path_params: HashMap::new(),
            cookie_params: HashMap::new(),
            request_body_schema: vec![],
            response_bodies: vec![],
            operation_id: "get_person".to_string(),
            openapi_json: json!({}),
        };
        let mut snapshot = ApiVersion::empty();
        snapshot
            .path_operations
            .insert("/people/{person_id}".to_string(), vec![op]);

        assert!(find_operation(&snapshot, "/people/7", HttpMethod::Get).is_some());
        assert!(find_operation(&snapshot, "/people/7", HttpMethod::Post).is_none());
        assert!(find_operation(&snapshot, "/pets/7", HttpMethod::Get).is_none());
    }

    #[tokio::test]
    async fn test_api_state_cache_returns_same_snapshot() {
        let state = make_state();
        let first = state.api_state_at("v1").await.unwrap();
        let second = state.api_state_at("v1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(state.api_state_at("v99").await.is_none());
    }
}
