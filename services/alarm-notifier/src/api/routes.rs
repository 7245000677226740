//! API routes configuration

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{get_status, health_check, process_batch};
use crate::api::ApiState;

pub fn create_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/batches", post(process_batch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
