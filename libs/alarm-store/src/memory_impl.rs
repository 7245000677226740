//! In-memory store implementations
//!
//! Uses DashMap for concurrent access. Suitable for testing and single-process
//! local runs; nothing survives a restart.

use crate::error::Result;
use crate::record::{QueueRecord, ReceivedRecord};
use crate::time::TimeProvider;
use crate::traits::*;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ==================== Idempotency ====================

/// In-memory idempotency store
pub struct MemoryIdempotencyStore {
    records: DashMap<String, IdempotencyRecord>,
    time: Arc<dyn TimeProvider>,
}

impl MemoryIdempotencyStore {
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self {
            records: DashMap::new(),
            time,
        }
    }

    /// Number of stored records, expired ones included
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.time.now_millis() + ttl.as_millis() as i64
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn create_if_absent(
        &self,
        fingerprint: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<CreateOutcome> {
        let now = self.time.now_millis();
        let fresh = IdempotencyRecord::in_progress(holder, self.expiry(ttl));

        // The entry guard holds the shard lock, making check-and-insert atomic
        match self.records.entry(fingerprint.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(fresh);
                    Ok(CreateOutcome::Created)
                } else {
                    Ok(CreateOutcome::Exists(occupied.get().clone()))
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Ok(CreateOutcome::Created)
            },
        }
    }

    async fn complete(
        &self,
        fingerprint: &str,
        holder: &str,
        result: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.time.now_millis();
        let expires_at_ms = self.expiry(ttl);
        match self.records.get_mut(fingerprint) {
            Some(mut record) if record.holder == holder && !record.is_expired(now) => {
                *record = IdempotencyRecord::complete(holder, result, expires_at_ms);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn extend(&self, fingerprint: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let now = self.time.now_millis();
        let expires_at_ms = self.expiry(ttl);
        match self.records.get_mut(fingerprint) {
            Some(mut record)
                if record.holder == holder
                    && record.status == IdempotencyStatus::InProgress
                    && !record.is_expired(now) =>
            {
                record.expires_at_ms = expires_at_ms;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn release(&self, fingerprint: &str, holder: &str) -> Result<bool> {
        let now = self.time.now_millis();
        let removed = self
            .records
            .remove_if(fingerprint, |_, record| {
                record.holder == holder && !record.is_expired(now)
            })
            .is_some();
        Ok(removed)
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<IdempotencyRecord>> {
        let now = self.time.now_millis();
        Ok(self
            .records
            .get(fingerprint)
            .filter(|record| !record.is_expired(now))
            .map(|record| record.value().clone()))
    }
}

// ==================== Destinations ====================

/// In-memory destination mapping
///
/// Destinations are kept sorted per identity, matching the Redis backend's
/// lexicographic order.
#[derive(Default)]
pub struct MemoryDestinationStore {
    mappings: DashMap<String, BTreeSet<String>>,
}

impl MemoryDestinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `(alarm_identity, destination_id)` pairs
    pub fn with_mappings<I, A, D>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, D)>,
        A: Into<String>,
        D: Into<String>,
    {
        let store = Self::new();
        for (identity, destination) in pairs {
            store
                .mappings
                .entry(identity.into())
                .or_default()
                .insert(destination.into());
        }
        store
    }
}

#[async_trait]
impl DestinationStore for MemoryDestinationStore {
    async fn query(&self, alarm_identity: &str) -> Result<Vec<String>> {
        Ok(self
            .mappings
            .get(alarm_identity)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DestinationRegistry for MemoryDestinationStore {
    async fn register(&self, alarm_identity: &str, destination_id: &str) -> Result<bool> {
        Ok(self
            .mappings
            .entry(alarm_identity.to_string())
            .or_default()
            .insert(destination_id.to_string()))
    }

    async fn unregister(&self, alarm_identity: &str, destination_id: &str) -> Result<bool> {
        let removed = match self.mappings.get_mut(alarm_identity) {
            Some(mut set) => set.remove(destination_id),
            None => false,
        };
        self.mappings.remove_if(alarm_identity, |_, set| set.is_empty());
        Ok(removed)
    }
}

// ==================== Queue ====================

#[derive(Default)]
struct QueueLists {
    pending: VecDeque<String>,
    processing: Vec<String>,
    dead: Vec<String>,
}

/// In-memory record queue
#[derive(Default)]
pub struct MemoryQueue {
    lists: Mutex<QueueLists>,
    arrivals: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records waiting to be received
    pub fn pending_len(&self) -> usize {
        self.lists.lock().pending.len()
    }

    /// Records received but not yet settled
    pub fn in_flight_len(&self) -> usize {
        self.lists.lock().processing.len()
    }

    fn enqueue_raw(&self, raw: String) {
        self.lists.lock().pending.push_back(raw);
        self.arrivals.notify_one();
    }

    fn take_in_flight(&self, raw: &str) -> bool {
        let mut lists = self.lists.lock();
        match lists.processing.iter().position(|r| r == raw) {
            Some(index) => {
                lists.processing.remove(index);
                true
            },
            None => false,
        }
    }

    fn drain_batch(&self, max: usize) -> Vec<ReceivedRecord> {
        let mut lists = self.lists.lock();
        let mut batch = Vec::new();
        while batch.len() < max {
            let Some(raw) = lists.pending.pop_front() else {
                break;
            };
            match serde_json::from_str::<QueueRecord>(&raw) {
                Ok(record) => {
                    lists.processing.push(raw.clone());
                    batch.push(ReceivedRecord { record, raw });
                },
                Err(e) => {
                    tracing::warn!("Unreadable queue entry moved to dead letters: {}", e);
                    lists.dead.push(raw);
                },
            }
        }
        batch
    }
}

#[async_trait]
impl RecordQueue for MemoryQueue {
    async fn push(&self, record: &QueueRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.enqueue_raw(raw);
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedRecord>> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let batch = self.drain_batch(max);
            if !batch.is_empty() {
                return Ok(batch);
            }
            let notified = self.arrivals.notified();
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.drain_batch(max));
            }
        }
    }

    async fn ack(&self, received: &ReceivedRecord) -> Result<()> {
        if !self.take_in_flight(&received.raw) {
            tracing::debug!("Ack for unknown in-flight record {}", received.record.message_id);
        }
        Ok(())
    }

    async fn redeliver(&self, received: &ReceivedRecord) -> Result<()> {
        self.take_in_flight(&received.raw);
        let raw = serde_json::to_string(&received.record.next_delivery())?;
        self.enqueue_raw(raw);
        Ok(())
    }

    async fn dead_letter(&self, received: &ReceivedRecord) -> Result<()> {
        self.take_in_flight(&received.raw);
        self.lists.lock().dead.push(received.raw.clone());
        Ok(())
    }

    async fn recover(&self) -> Result<usize> {
        let moved = {
            let mut lists = self.lists.lock();
            let orphans: Vec<String> = lists.processing.drain(..).collect();
            let count = orphans.len();
            lists.pending.extend(orphans);
            count
        };
        if moved > 0 {
            self.arrivals.notify_one();
        }
        Ok(moved)
    }

    async fn dead_letters(&self) -> Result<Vec<QueueRecord>> {
        let lists = self.lists.lock();
        Ok(lists
            .dead
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::time::ManualTimeProvider;

    const TTL: Duration = Duration::from_secs(60);

    fn store() -> (MemoryIdempotencyStore, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(1_000_000));
        (MemoryIdempotencyStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_create_then_exists() {
        let (store, _clock) = store();
        let first = store.create_if_absent("fp", "a", TTL).await.unwrap();
        assert_eq!(first, CreateOutcome::Created);

        match store.create_if_absent("fp", "b", TTL).await.unwrap() {
            CreateOutcome::Exists(record) => {
                assert_eq!(record.holder, "a");
                assert_eq!(record.status, IdempotencyStatus::InProgress);
            },
            other => panic!("expected Exists, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_record_is_replaced() {
        let (store, clock) = store();
        store.create_if_absent("fp", "a", TTL).await.unwrap();
        clock.advance(TTL);

        assert!(store.get("fp").await.unwrap().is_none());
        let outcome = store.create_if_absent("fp", "b", TTL).await.unwrap();
        assert_eq!(outcome, CreateOutcome::Created);
        assert_eq!(store.get("fp").await.unwrap().unwrap().holder, "b");
    }

    #[tokio::test]
    async fn test_complete_requires_holder() {
        let (store, _clock) = store();
        store.create_if_absent("fp", "a", TTL).await.unwrap();

        assert!(!store.complete("fp", "b", "{}", TTL).await.unwrap());
        assert!(store.complete("fp", "a", r#"{"n":1}"#, TTL).await.unwrap());

        let record = store.get("fp").await.unwrap().unwrap();
        assert_eq!(record.status, IdempotencyStatus::Complete);
        assert_eq!(record.result.as_deref(), Some(r#"{"n":1}"#));
    }

    #[tokio::test]
    async fn test_complete_after_lease_expired_fails() {
        let (store, clock) = store();
        store.create_if_absent("fp", "a", TTL).await.unwrap();
        clock.advance(TTL + Duration::from_millis(1));
        assert!(!store.complete("fp", "a", "{}", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_keeps_lease_alive() {
        let (store, clock) = store();
        store.create_if_absent("fp", "a", TTL).await.unwrap();

        clock.advance(Duration::from_secs(50));
        assert!(!store.extend("fp", "b", TTL).await.unwrap());
        assert!(store.extend("fp", "a", TTL).await.unwrap());

        // Past the original expiry, still held
        clock.advance(Duration::from_secs(50));
        assert!(matches!(
            store.create_if_absent("fp", "b", TTL).await.unwrap(),
            CreateOutcome::Exists(_)
        ));
        assert!(store.complete("fp", "a", "{}", TTL).await.unwrap());

        // COMPLETE records are not extended
        assert!(!store.extend("fp", "a", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_extend_after_lease_expired_fails() {
        let (store, clock) = store();
        store.create_if_absent("fp", "a", TTL).await.unwrap();
        clock.advance(TTL);
        assert!(!store.extend("fp", "a", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_requires_holder() {
        let (store, _clock) = store();
        store.create_if_absent("fp", "a", TTL).await.unwrap();

        assert!(!store.release("fp", "b").await.unwrap());
        assert!(store.get("fp").await.unwrap().is_some());

        assert!(store.release("fp", "a").await.unwrap());
        assert!(store.get("fp").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_destinations_sorted_and_unique() {
        let store = MemoryDestinationStore::new();
        assert!(store.register("arn:a", "C2").await.unwrap());
        assert!(store.register("arn:a", "C1").await.unwrap());
        assert!(!store.register("arn:a", "C1").await.unwrap());

        assert_eq!(store.query("arn:a").await.unwrap(), vec!["C1", "C2"]);
        assert!(store.query("arn:missing").await.unwrap().is_empty());

        assert!(store.unregister("arn:a", "C1").await.unwrap());
        assert!(!store.unregister("arn:a", "C1").await.unwrap());
        assert_eq!(store.query("arn:a").await.unwrap(), vec!["C2"]);
    }

    #[tokio::test]
    async fn test_queue_receive_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let batch = queue
            .receive(10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_queue_unreadable_entry_dead_lettered() {
        let queue = MemoryQueue::new();
        queue.enqueue_raw("not json".to_string());
        queue.push(&QueueRecord::new("m1", "{}")).await.unwrap();

        let batch = queue.receive(10, Duration::ZERO).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].record.message_id, "m1");
        assert_eq!(queue.lists.lock().dead.len(), 1);
    }
}
