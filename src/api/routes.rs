use axum::{middleware::from_fn_with_state, routing::get, Router};
use std::sync::Arc;
use tower::Layer;

use crate::api::handlers;
use crate::api::middleware::{versioned_api_middleware, VersioningState};

/// Routes the versioning layer serves itself: health, the version listing,
/// and the per-version OpenAPI document.
pub fn versioning_routes() -> Router<Arc<VersioningState>> {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/versions", get(handlers::list_versions))
        .route("/openapi.json", get(handlers::get_openapi_spec))
}

/// Wrap an application router with the versioning middleware and mount the
/// versioning layer's own routes next to it.
///
/// The middleware must run before routing (old clients may send pre-rename
/// URLs that only resolve after the path rewrite), so the wrapped router is
/// re-exposed through a fallback service instead of `Router::layer`, which
/// would run the middleware only after a route has already matched.
pub fn with_versioning(app: Router, state: Arc<VersioningState>) -> Router {
    let inner = app.merge(versioning_routes().with_state(state.clone()));
    let wrapped = from_fn_with_state(state, versioned_api_middleware).layer(inner);
    Router::new().fallback_service(wrapped)
}
