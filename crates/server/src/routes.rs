//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use crate::tus::tus_resumable;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let base = state.config.server.base_path.clone();
    let body_limit = usize::try_from(state.config.server.max_chunk_size).unwrap_or(usize::MAX);

    let collection = post(handlers::create_upload).options(handlers::options);
    let mut tus_routes = Router::new()
        .route(&base, collection.clone())
        .route(
            &format!("{base}{{upload_id}}"),
            get(handlers::get_upload)
                .head(handlers::head_upload)
                .patch(handlers::patch_upload)
                .delete(handlers::delete_upload)
                .options(handlers::options),
        );
    // Accept the collection URL without its trailing slash as well.
    let bare = base.trim_end_matches('/');
    if !bare.is_empty() {
        tus_routes = tus_routes.route(bare, collection);
    }

    let tus_routes = tus_routes
        .layer(middleware::from_fn(tus_resumable))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(tus_routes);

    // Conditionally add metrics endpoint based on config.
    // SECURITY: When enabled, restrict this endpoint to scraper IPs.
    if state.config.server.metrics_enabled {
        router = router.route(&state.config.server.metrics_path, get(metrics_handler));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
