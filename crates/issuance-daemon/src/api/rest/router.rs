//! API Router configuration

use super::handlers;
use super::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Router options taken from the server configuration
#[derive(Debug, Clone, Copy)]
pub struct RouterOptions {
    pub enable_cors: bool,
    pub max_body_size: usize,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            enable_cors: true,
            max_body_size: 1024 * 1024,
        }
    }
}

/// Create the main API router
pub fn create_router(state: AppState, options: RouterOptions) -> Router {
    let api_routes = Router::new()
        // Health and status
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::daemon_status))
        // Projects
        .route("/projects", post(handlers::submit_project))
        .route("/projects/:project_ref/workflow", get(handlers::get_workflow))
        .route("/projects/:project_ref/credit", get(handlers::get_credit))
        // Treasury
        .route("/treasury", get(handlers::list_treasury))
        // Pipeline
        .route("/pipeline/run", post(handlers::run_pipeline))
        // Events
        .route("/events/stream", get(handlers::stream_events));

    let router = Router::new()
        .route("/webhook", post(handlers::receive_webhook))
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(options.max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if options.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
