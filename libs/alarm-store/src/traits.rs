//! Trait definitions for the notifier stores
//!
//! Implementations:
//! - `Redis*`: production backends sharing one pooled client
//! - `Memory*`: in-process backends for tests and local runs

use crate::error::Result;
use crate::record::{QueueRecord, ReceivedRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ========== Idempotency ==========

/// Persisted status of an idempotency record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    InProgress,
    Complete,
}

/// Observed lifecycle state, including expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyState {
    InProgress,
    Complete,
    Expired,
}

/// Stored idempotency record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub status: IdempotencyStatus,
    /// Opaque token of the worker that created the record
    pub holder: String,
    /// Serialized outcome, present once complete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub expires_at_ms: i64,
}

impl IdempotencyRecord {
    pub fn in_progress(holder: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            status: IdempotencyStatus::InProgress,
            holder: holder.into(),
            result: None,
            expires_at_ms,
        }
    }

    pub fn complete(holder: impl Into<String>, result: impl Into<String>, expires_at_ms: i64) -> Self {
        Self {
            status: IdempotencyStatus::Complete,
            holder: holder.into(),
            result: Some(result.into()),
            expires_at_ms,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms
    }

    pub fn state(&self, now_ms: i64) -> IdempotencyState {
        if self.is_expired(now_ms) {
            return IdempotencyState::Expired;
        }
        match self.status {
            IdempotencyStatus::InProgress => IdempotencyState::InProgress,
            IdempotencyStatus::Complete => IdempotencyState::Complete,
        }
    }
}

/// Result of [`IdempotencyStore::create_if_absent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The caller now holds the IN_PROGRESS record
    Created,
    /// A live record already exists
    Exists(IdempotencyRecord),
}

/// Idempotency record storage
///
/// Expired records are indistinguishable from absent ones for every
/// operation. `complete` and `release` only act when `holder` still owns the
/// record, so a worker whose lease expired cannot clobber a successor.
#[async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    /// Atomically create an IN_PROGRESS record expiring after `ttl`
    async fn create_if_absent(
        &self,
        fingerprint: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<CreateOutcome>;

    /// Mark the record COMPLETE with a cached result; false if `holder` lost it
    async fn complete(
        &self,
        fingerprint: &str,
        holder: &str,
        result: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Push back the expiry of an IN_PROGRESS record; false if `holder` lost it
    async fn extend(&self, fingerprint: &str, holder: &str, ttl: Duration) -> Result<bool>;

    /// Delete the record; false if `holder` no longer owns it
    async fn release(&self, fingerprint: &str, holder: &str) -> Result<bool>;

    /// Fetch the live record, if any
    async fn get(&self, fingerprint: &str) -> Result<Option<IdempotencyRecord>>;
}

// ========== Destinations ==========

/// Read side of the alarm identity -> destination mapping
#[async_trait]
pub trait DestinationStore: Send + Sync + 'static {
    /// Destinations subscribed to `alarm_identity`, in store order
    async fn query(&self, alarm_identity: &str) -> Result<Vec<String>>;
}

/// Write side of the mapping, used by operator tooling
#[async_trait]
pub trait DestinationRegistry: DestinationStore {
    /// Add a mapping; false if it already existed
    async fn register(&self, alarm_identity: &str, destination_id: &str) -> Result<bool>;

    /// Remove a mapping; false if it did not exist
    async fn unregister(&self, alarm_identity: &str, destination_id: &str) -> Result<bool>;
}

// ========== Queue ==========

/// Reliable record queue with redelivery and a dead-letter list
///
/// A received record stays in-flight until it is acked, redelivered or
/// dead-lettered. Records left in-flight by a crashed consumer are returned
/// to the queue by [`RecordQueue::recover`].
#[async_trait]
pub trait RecordQueue: Send + Sync + 'static {
    /// Append a record to the tail of the queue
    async fn push(&self, record: &QueueRecord) -> Result<()>;

    /// Take up to `max` records, waiting at most `wait` for the first one
    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedRecord>>;

    /// Drop an in-flight record after successful handling
    async fn ack(&self, received: &ReceivedRecord) -> Result<()>;

    /// Return an in-flight record to the queue with its receive count bumped
    async fn redeliver(&self, received: &ReceivedRecord) -> Result<()>;

    /// Move an in-flight record to the dead-letter list
    async fn dead_letter(&self, received: &ReceivedRecord) -> Result<()>;

    /// Move every in-flight record back to the queue; returns how many moved
    async fn recover(&self) -> Result<usize>;

    /// Records currently in the dead-letter list
    async fn dead_letters(&self) -> Result<Vec<QueueRecord>>;
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_record_state() {
        let record = IdempotencyRecord::in_progress("worker-a", 1_000);
        assert_eq!(record.state(999), IdempotencyState::InProgress);
        assert_eq!(record.state(1_000), IdempotencyState::Expired);

        let done = IdempotencyRecord::complete("worker-a", "{}", 5_000);
        assert_eq!(done.state(1_000), IdempotencyState::Complete);
        assert_eq!(done.state(5_001), IdempotencyState::Expired);
    }

    #[test]
    fn test_record_wire_format() {
        let record = IdempotencyRecord::in_progress("worker-a", 42);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"status":"IN_PROGRESS","holder":"worker-a","expires_at_ms":42}"#
        );

        let done: IdempotencyRecord = serde_json::from_str(
            r#"{"status":"COMPLETE","holder":"w","result":"{\"ok\":1}","expires_at_ms":7}"#,
        )
        .unwrap();
        assert_eq!(done.status, IdempotencyStatus::Complete);
        assert_eq!(done.result.as_deref(), Some(r#"{"ok":1}"#));
    }
}
