//! API handlers

use axum::{extract::State, response::Json};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

use crate::api::models::{BatchRequest, HealthResponse, StatusResponse};
use crate::api::ApiState;
use crate::batch::BatchResponse;
use crate::config::SERVICE_NAME;

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

pub async fn get_status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        batches_processed: state.batches.load(Ordering::Relaxed),
        records_processed: state.records.load(Ordering::Relaxed),
        records_failed: state.failures.load(Ordering::Relaxed),
    })
}

/// Process a submitted batch and answer with the records to retry
///
/// Always 200: per-record failures are part of the body, never the status.
pub async fn process_batch(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<BatchRequest>,
) -> Json<BatchResponse> {
    info!(records = request.records.len(), "Received batch over HTTP");

    let report = state.coordinator.process(&request.records).await;

    state.batches.fetch_add(1, Ordering::Relaxed);
    state
        .records
        .fetch_add(request.records.len() as u64, Ordering::Relaxed);
    state
        .failures
        .fetch_add(report.failures.len() as u64, Ordering::Relaxed);

    Json(report.to_response())
}
