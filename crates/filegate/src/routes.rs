use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{MethodRouter, get},
};
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers;

/// Browse, upload and delete on an arbitrary virtual path.
fn file_methods() -> MethodRouter<AppState> {
    get(handlers::browse)
        .post(handlers::upload)
        .delete(handlers::delete)
}

/// Create gateway routes
///
/// Probes only claim GET; uploads and deletes still reach their handlers on
/// the probe paths.
pub fn gateway_routes() -> Router<AppState> {
    Router::new()
        // Health probes
        .route(
            "/readyz",
            get(handlers::readyz)
                .post(handlers::upload)
                .delete(handlers::delete),
        )
        .route(
            "/livez",
            get(handlers::livez)
                .post(handlers::upload)
                .delete(handlers::delete),
        )
        // Everything under the root directory
        .route("/", file_methods())
        .route("/{*path}", file_methods())
}

/// Build the complete application: routes, body limit and request tracing.
pub fn gateway_router(state: AppState) -> Router {
    let body_limit = match state.config.max_request_body {
        Some(max) => DefaultBodyLimit::max(max),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .merge(gateway_routes())
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
