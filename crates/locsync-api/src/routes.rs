use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::handlers;
use crate::state::AppState;

/// Recursive clones can spend a while in translator calls, so the request
/// timeout is generous.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/deepl/status", get(handlers::deepl_status))
        .route("/api/clone", post(handlers::clone_entry))
        .route("/api/incremental/status", get(handlers::incremental_status))
        .route("/api/incremental/update", post(handlers::incremental_update))
        .route(
            "/api/incremental/relationships/:entryId",
            get(handlers::list_relationships),
        )
        .route(
            "/api/incremental/backups/:entryId",
            get(handlers::list_backups),
        )
        .route(
            "/api/incremental/deep-references/:sourceId/:targetId",
            get(handlers::deep_reference_stats),
        )
        .route(
            "/api/incremental/deep-references/:sourceId/:targetId/rebuild",
            post(handlers::rebuild_deep_references),
        )
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
}
