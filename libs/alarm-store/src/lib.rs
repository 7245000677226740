//! Alarm notifier store abstraction
//!
//! Provides the external stores the notification pipeline depends on,
//! each behind a trait with a Redis backend and an in-memory backend.
//!
//! # Key Components
//!
//! - **IdempotencyStore**: at-most-once bookkeeping keyed by event fingerprint
//! - **DestinationStore**: alarm identity -> chat destination mapping
//! - **RecordQueue**: reliable record queue with redelivery and dead-lettering
//! - **KeySpace**: Redis key naming

pub mod error;

pub mod keyspace;

pub mod memory_impl;

#[cfg(feature = "redis-backend")]
pub mod redis_impl;

pub mod record;

pub mod time;

pub mod traits;

// Re-exports
pub use error::{Result, StoreError};
pub use keyspace::KeySpace;
pub use memory_impl::{MemoryDestinationStore, MemoryIdempotencyStore, MemoryQueue};
pub use record::{QueueRecord, ReceivedRecord};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
pub use traits::{
    CreateOutcome, DestinationRegistry, DestinationStore, IdempotencyRecord, IdempotencyState,
    IdempotencyStatus, IdempotencyStore, RecordQueue,
};

#[cfg(feature = "redis-backend")]
pub use redis_impl::{RedisDestinationStore, RedisIdempotencyStore, RedisQueue};

/// Helper functions for common operations
pub mod helpers {
    use super::{MemoryDestinationStore, MemoryIdempotencyStore, MemoryQueue};
    use super::{ManualTimeProvider, SystemTimeProvider};
    use std::sync::Arc;

    // ==================== Test Support ====================

    /// In-memory idempotency store on the system clock
    pub fn create_test_idempotency_store() -> Arc<MemoryIdempotencyStore> {
        Arc::new(MemoryIdempotencyStore::new(Arc::new(SystemTimeProvider)))
    }

    /// In-memory idempotency store on a manually advanced clock
    ///
    /// Returns the clock so the test can move time past expiries.
    pub fn create_test_idempotency_store_with_clock(
        start_ms: i64,
    ) -> (Arc<MemoryIdempotencyStore>, Arc<ManualTimeProvider>) {
        let clock = Arc::new(ManualTimeProvider::new(start_ms));
        let store = Arc::new(MemoryIdempotencyStore::new(clock.clone()));
        (store, clock)
    }

    /// In-memory destination store
    pub fn create_test_destination_store() -> Arc<MemoryDestinationStore> {
        Arc::new(MemoryDestinationStore::new())
    }

    /// In-memory record queue
    pub fn create_test_queue() -> Arc<MemoryQueue> {
        Arc::new(MemoryQueue::new())
    }
}
