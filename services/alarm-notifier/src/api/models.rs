//! API request and response models

use alarm_store::QueueRecord;
use serde::{Deserialize, Serialize};

/// Batch submission in the queue's own delivery shape
#[derive(Debug, Deserialize, Serialize)]
pub struct BatchRequest {
    #[serde(rename = "Records")]
    pub records: Vec<QueueRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub service: String,
    pub version: String,
    pub uptime_secs: i64,
    pub batches_processed: u64,
    pub records_processed: u64,
    pub records_failed: u64,
}
