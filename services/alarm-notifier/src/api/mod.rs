//! HTTP surface
//!
//! Accepts record batches in the queue delivery shape and answers with the
//! partial batch response, next to health and status endpoints.

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::create_router;

use crate::batch::BatchCoordinator;
use chrono::{DateTime, Utc};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Shared handler state
pub struct ApiState {
    pub coordinator: Arc<BatchCoordinator>,
    pub started_at: DateTime<Utc>,
    pub(crate) batches: AtomicU64,
    pub(crate) records: AtomicU64,
    pub(crate) failures: AtomicU64,
}

impl ApiState {
    pub fn new(coordinator: Arc<BatchCoordinator>) -> Self {
        Self {
            coordinator,
            started_at: Utc::now(),
            batches: AtomicU64::new(0),
            records: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}
