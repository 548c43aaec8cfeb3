//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let initiate_limit = state.config.upload.max_initiate_body_size;
    let chunk_limit = usize::try_from(state.config.upload.max_chunk_size).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        // Health check (unauthenticated, for load balancers)
        .route("/api/status", get(handlers::health_check))
        // Upload session lifecycle
        .route(
            "/api/fleet/uploads",
            post(handlers::create_upload).layer(DefaultBodyLimit::max(initiate_limit)),
        )
        .route(
            "/api/fleet/uploads/{upload_id}",
            post(handlers::complete_upload)
                .get(handlers::get_upload)
                .delete(handlers::delete_upload),
        )
        .route(
            "/api/fleet/uploads/{upload_id}/{chunk}",
            put(handlers::upload_chunk).layer(DefaultBodyLimit::max(chunk_limit)),
        );

    let mut router = Router::new().merge(api_routes);

    // The metrics endpoint is unauthenticated; restrict it at the network level.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
