//! API routes configuration

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::api::handlers::*;
use crate::AppState;

/// Create API routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/data", post(read_data))
        .route("/config", get(get_config).post(update_config))
        .route("/disconnect", post(disconnect))
        .route("/connections", get(list_connections))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Endpoint summary logged at startup
pub fn endpoint_summary() -> &'static [(&'static str, &'static str)] {
    &[
        ("POST", "/data"),
        ("GET", "/config"),
        ("POST", "/config"),
        ("POST", "/disconnect"),
        ("GET", "/connections"),
        ("GET", "/health"),
    ]
}
