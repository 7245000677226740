//! Redis store implementations
//!
//! All three stores share one pooled [`RedisClient`]. Holder-checked updates
//! of idempotency records run as Lua scripts so the read-compare-write is
//! atomic on the server.

use crate::error::{Result, StoreError};
use crate::keyspace::KeySpace;
use crate::record::{QueueRecord, ReceivedRecord};
use crate::time::TimeProvider;
use crate::traits::*;
use async_trait::async_trait;
use common::redis::RedisClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Returns the existing value, or stores ARGV[1] with PX ARGV[2] and returns nil
const CREATE_IF_ABSENT_LUA: &str = r#"
local existing = redis.call('GET', KEYS[1])
if existing then
    return existing
end
redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
return false
"#;

/// Overwrites with ARGV[2] PX ARGV[3] when the stored holder equals ARGV[1]
const COMPLETE_LUA: &str = r#"
local existing = redis.call('GET', KEYS[1])
if not existing then
    return 0
end
local record = cjson.decode(existing)
if record['holder'] ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// Rewrites an IN_PROGRESS record held by ARGV[1] as ARGV[2] PX ARGV[3]
const EXTEND_LUA: &str = r#"
local existing = redis.call('GET', KEYS[1])
if not existing then
    return 0
end
local record = cjson.decode(existing)
if record['holder'] ~= ARGV[1] or record['status'] ~= 'IN_PROGRESS' then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
return 1
"#;

/// Deletes the key when the stored holder equals ARGV[1]
const RELEASE_LUA: &str = r#"
local existing = redis.call('GET', KEYS[1])
if not existing then
    return 0
end
local record = cjson.decode(existing)
if record['holder'] ~= ARGV[1] then
    return 0
end
redis.call('DEL', KEYS[1])
return 1
"#;

fn ttl_millis(ttl: Duration) -> String {
    ttl.as_millis().max(1).to_string()
}

// ==================== Idempotency ====================

/// Idempotency records as JSON strings with server-side PX expiry
pub struct RedisIdempotencyStore {
    client: Arc<RedisClient>,
    keyspace: KeySpace,
    time: Arc<dyn TimeProvider>,
    create_script: redis::Script,
    complete_script: redis::Script,
    extend_script: redis::Script,
    release_script: redis::Script,
}

impl RedisIdempotencyStore {
    pub fn new(client: Arc<RedisClient>, keyspace: KeySpace, time: Arc<dyn TimeProvider>) -> Self {
        Self {
            client,
            keyspace,
            time,
            create_script: redis::Script::new(CREATE_IF_ABSENT_LUA),
            complete_script: redis::Script::new(COMPLETE_LUA),
            extend_script: redis::Script::new(EXTEND_LUA),
            release_script: redis::Script::new(RELEASE_LUA),
        }
    }

    fn decode(&self, key: &str, raw: &str) -> Result<IdempotencyRecord> {
        serde_json::from_str(raw).map_err(|e| StoreError::CorruptRecord {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn create_if_absent(
        &self,
        fingerprint: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<CreateOutcome> {
        let key = self.keyspace.idempotency_key(fingerprint);
        let expires_at_ms = self.time.now_millis() + ttl.as_millis() as i64;
        let fresh = serde_json::to_string(&IdempotencyRecord::in_progress(holder, expires_at_ms))?;

        let existing: Option<String> = self
            .client
            .eval(&self.create_script, &[&key], &[fresh, ttl_millis(ttl)])
            .await?;

        match existing {
            None => Ok(CreateOutcome::Created),
            Some(raw) => Ok(CreateOutcome::Exists(self.decode(&key, &raw)?)),
        }
    }

    async fn complete(
        &self,
        fingerprint: &str,
        holder: &str,
        result: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let key = self.keyspace.idempotency_key(fingerprint);
        let expires_at_ms = self.time.now_millis() + ttl.as_millis() as i64;
        let done = serde_json::to_string(&IdempotencyRecord::complete(holder, result, expires_at_ms))?;

        let updated: i64 = self
            .client
            .eval(
                &self.complete_script,
                &[&key],
                &[holder.to_string(), done, ttl_millis(ttl)],
            )
            .await?;
        if updated == 0 {
            debug!("Idempotency record {} no longer held by {}", key, holder);
        }
        Ok(updated == 1)
    }

    async fn extend(&self, fingerprint: &str, holder: &str, ttl: Duration) -> Result<bool> {
        let key = self.keyspace.idempotency_key(fingerprint);
        let expires_at_ms = self.time.now_millis() + ttl.as_millis() as i64;
        let renewed = serde_json::to_string(&IdempotencyRecord::in_progress(holder, expires_at_ms))?;

        let updated: i64 = self
            .client
            .eval(
                &self.extend_script,
                &[&key],
                &[holder.to_string(), renewed, ttl_millis(ttl)],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn release(&self, fingerprint: &str, holder: &str) -> Result<bool> {
        let key = self.keyspace.idempotency_key(fingerprint);
        let deleted: i64 = self
            .client
            .eval(&self.release_script, &[&key], &[holder.to_string()])
            .await?;
        Ok(deleted == 1)
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<IdempotencyRecord>> {
        let key = self.keyspace.idempotency_key(fingerprint);
        match self.client.get::<String>(&key).await? {
            Some(raw) => Ok(Some(self.decode(&key, &raw)?)),
            None => Ok(None),
        }
    }
}

// ==================== Destinations ====================

/// Destination mapping as one score-0 sorted set per alarm identity
pub struct RedisDestinationStore {
    client: Arc<RedisClient>,
    keyspace: KeySpace,
}

impl RedisDestinationStore {
    pub fn new(client: Arc<RedisClient>, keyspace: KeySpace) -> Self {
        Self { client, keyspace }
    }
}

#[async_trait]
impl DestinationStore for RedisDestinationStore {
    async fn query(&self, alarm_identity: &str) -> Result<Vec<String>> {
        let key = self.keyspace.destinations_key(alarm_identity);
        Ok(self.client.zrange_all(&key).await?)
    }
}

#[async_trait]
impl DestinationRegistry for RedisDestinationStore {
    async fn register(&self, alarm_identity: &str, destination_id: &str) -> Result<bool> {
        let key = self.keyspace.destinations_key(alarm_identity);
        Ok(self.client.zadd_lex(&key, destination_id).await?)
    }

    async fn unregister(&self, alarm_identity: &str, destination_id: &str) -> Result<bool> {
        let key = self.keyspace.destinations_key(alarm_identity);
        Ok(self.client.zrem(&key, destination_id).await?)
    }
}

// ==================== Queue ====================

/// Reliable list queue
///
/// Receiving moves entries from the queue list into a processing list, so a
/// consumer crash leaves them recoverable. Settling removes the exact entry
/// from the processing list.
pub struct RedisQueue {
    client: Arc<RedisClient>,
    keyspace: KeySpace,
}

impl RedisQueue {
    pub fn new(client: Arc<RedisClient>, keyspace: KeySpace) -> Self {
        Self { client, keyspace }
    }

    /// Parse a moved entry; unreadable ones go straight to the dead-letter list
    async fn admit(&self, raw: String) -> Result<Option<ReceivedRecord>> {
        match serde_json::from_str::<QueueRecord>(&raw) {
            Ok(record) => Ok(Some(ReceivedRecord { record, raw })),
            Err(e) => {
                warn!("Unreadable queue entry moved to dead letters: {}", e);
                self.client
                    .rpush(&self.keyspace.dead_letter_key(), &raw)
                    .await?;
                self.client
                    .lrem(&self.keyspace.processing_key(), 1, &raw)
                    .await?;
                Ok(None)
            },
        }
    }

    async fn settle(&self, received: &ReceivedRecord) -> Result<()> {
        let removed = self
            .client
            .lrem(&self.keyspace.processing_key(), 1, &received.raw)
            .await?;
        if removed == 0 {
            debug!(
                "Record {} was not in the processing list",
                received.record.message_id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RecordQueue for RedisQueue {
    async fn push(&self, record: &QueueRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.client.rpush(&self.keyspace.queue_key(), &raw).await?;
        Ok(())
    }

    async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<ReceivedRecord>> {
        let queue = self.keyspace.queue_key();
        let processing = self.keyspace.processing_key();
        let mut batch = Vec::new();
        if max == 0 {
            return Ok(batch);
        }

        // Block for the first entry only, then drain what is already there
        let first = if wait.is_zero() {
            self.client.lmove(&queue, &processing).await?
        } else {
            self.client.blmove(&queue, &processing, wait).await?
        };
        let Some(first) = first else {
            return Ok(batch);
        };
        if let Some(received) = self.admit(first).await? {
            batch.push(received);
        }

        while batch.len() < max {
            match self.client.lmove(&queue, &processing).await? {
                Some(raw) => {
                    if let Some(received) = self.admit(raw).await? {
                        batch.push(received);
                    }
                },
                None => break,
            }
        }
        Ok(batch)
    }

    async fn ack(&self, received: &ReceivedRecord) -> Result<()> {
        self.settle(received).await
    }

    async fn redeliver(&self, received: &ReceivedRecord) -> Result<()> {
        let raw = serde_json::to_string(&received.record.next_delivery())?;
        // Push before settling; a crash in between duplicates the record
        self.client.rpush(&self.keyspace.queue_key(), &raw).await?;
        self.settle(received).await
    }

    async fn dead_letter(&self, received: &ReceivedRecord) -> Result<()> {
        self.client
            .rpush(&self.keyspace.dead_letter_key(), &received.raw)
            .await?;
        self.settle(received).await
    }

    async fn recover(&self) -> Result<usize> {
        let queue = self.keyspace.queue_key();
        let processing = self.keyspace.processing_key();
        let mut moved = 0;
        while self.client.lmove(&processing, &queue).await?.is_some() {
            moved += 1;
        }
        Ok(moved)
    }

    async fn dead_letters(&self) -> Result<Vec<QueueRecord>> {
        let raws = self
            .client
            .lrange(&self.keyspace.dead_letter_key(), 0, -1)
            .await?;
        Ok(raws
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect())
    }
}
