//! Idempotency guard
//!
//! Runs a unit of work at most once per fingerprint across batches, workers
//! and process instances sharing the store:
//!
//! 1. create an IN_PROGRESS record (holder = random token)
//! 2. COMPLETE record found: return its cached result, do not run the work
//! 3. IN_PROGRESS held by someone else: poll until it clears or the wait times out
//! 4. while the work runs, extend the IN_PROGRESS lease every third of its TTL
//! 5. work fails: delete the record so redelivery can retry
//! 6. work succeeds: store COMPLETE with the serialized result

use crate::config::IdempotencySettings;
use crate::error::{NotifierError, Result};
use alarm_store::{CreateOutcome, IdempotencyStatus, IdempotencyStore, StoreError};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

/// Guard timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardConfig {
    pub retention: Duration,
    pub in_progress_ttl: Duration,
    pub lock_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::from(&IdempotencySettings::default())
    }
}

impl From<&IdempotencySettings> for GuardConfig {
    fn from(settings: &IdempotencySettings) -> Self {
        Self {
            retention: settings.retention(),
            in_progress_ttl: settings.in_progress_ttl(),
            lock_wait: settings.lock_wait(),
            poll_interval: settings.poll_interval(),
        }
    }
}

/// How a guarded call produced its value
#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome<T> {
    /// The work ran in this call
    Executed(T),
    /// An earlier call completed; the cached result is returned
    Cached(T),
}

impl<T> GuardOutcome<T> {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Executed(value) | Self::Cached(value) => value,
        }
    }
}

pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    config: GuardConfig,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, config: GuardConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Execute `work` at most once for `fingerprint`
    pub async fn guard<T, F, Fut>(&self, fingerprint: &str, work: F) -> Result<GuardOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let holder = Uuid::new_v4().to_string();

        if let Some(cached) = self.acquire(fingerprint, &holder).await? {
            debug!("Returning cached result for {}", fingerprint);
            return Ok(GuardOutcome::Cached(cached));
        }

        let value = match self.run_with_lease(fingerprint, &holder, work()).await {
            Ok(value) => value,
            Err(err) => {
                self.release(fingerprint, &holder).await;
                return Err(err);
            },
        };

        let encoded = match serde_json::to_string(&value) {
            Ok(encoded) => encoded,
            Err(e) => {
                self.release(fingerprint, &holder).await;
                return Err(NotifierError::Internal(format!(
                    "cannot serialize result for {}: {}",
                    fingerprint, e
                )));
            },
        };

        match self
            .store
            .complete(fingerprint, &holder, &encoded, self.config.retention)
            .await
        {
            Ok(true) => Ok(GuardOutcome::Executed(value)),
            Ok(false) => {
                warn!(
                    fingerprint,
                    "In-progress lease lost before completion could be recorded"
                );
                Err(NotifierError::CompletionNotPersisted {
                    fingerprint: fingerprint.to_string(),
                })
            },
            Err(e) => {
                warn!(fingerprint, "Failed to record completion: {}", e);
                self.release(fingerprint, &holder).await;
                Err(NotifierError::CompletionNotPersisted {
                    fingerprint: fingerprint.to_string(),
                })
            },
        }
    }

    /// Drive `work` to completion, extending the IN_PROGRESS lease meanwhile
    async fn run_with_lease<T, Fut>(&self, fingerprint: &str, holder: &str, work: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let period = (self.config.in_progress_ttl / 3).max(Duration::from_millis(1));
        let mut renew = tokio::time::interval_at(Instant::now() + period, period);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::pin!(work);
        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = renew.tick() => {
                    match self.store.extend(fingerprint, holder, self.config.in_progress_ttl).await {
                        Ok(true) => debug!("Extended in-progress lease for {}", fingerprint),
                        Ok(false) => warn!(fingerprint, "In-progress lease lost while work is running"),
                        Err(e) => warn!(fingerprint, "Failed to extend in-progress lease: {}", e),
                    }
                },
            }
        }
    }

    /// Take the IN_PROGRESS record, or return the cached result of a completed run
    async fn acquire<T: DeserializeOwned>(&self, fingerprint: &str, holder: &str) -> Result<Option<T>> {
        let deadline = Instant::now() + self.config.lock_wait;

        loop {
            let existing = match self
                .store
                .create_if_absent(fingerprint, holder, self.config.in_progress_ttl)
                .await?
            {
                CreateOutcome::Created => return Ok(None),
                CreateOutcome::Exists(record) => record,
            };

            match existing.status {
                IdempotencyStatus::Complete => {
                    let raw = existing.result.ok_or_else(|| StoreError::CorruptRecord {
                        key: fingerprint.to_string(),
                        reason: "COMPLETE record without result".to_string(),
                    })?;
                    let cached = serde_json::from_str(&raw).map_err(|e| StoreError::CorruptRecord {
                        key: fingerprint.to_string(),
                        reason: e.to_string(),
                    })?;
                    return Ok(Some(cached));
                },
                IdempotencyStatus::InProgress => {
                    let now = Instant::now();
                    if now >= deadline {
                        warn!(fingerprint, holder = %existing.holder, "Gave up waiting for in-progress event");
                        return Err(NotifierError::GuardTimeout {
                            fingerprint: fingerprint.to_string(),
                        });
                    }
                    debug!(fingerprint, holder = %existing.holder, "Event in progress elsewhere, waiting");
                    tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
                },
            }
        }
    }

    async fn release(&self, fingerprint: &str, holder: &str) {
        match self.store.release(fingerprint, holder).await {
            Ok(true) => debug!("Released in-progress record {}", fingerprint),
            Ok(false) => debug!("In-progress record {} already gone", fingerprint),
            // The IN_PROGRESS lease still expires on its own
            Err(e) => warn!(fingerprint, "Failed to release in-progress record: {}", e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use alarm_store::helpers::{create_test_idempotency_store, create_test_idempotency_store_with_clock};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_config() -> GuardConfig {
        GuardConfig {
            retention: Duration::from_secs(3600),
            in_progress_ttl: Duration::from_secs(60),
            lock_wait: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_work_runs_once() {
        let guard = IdempotencyGuard::new(create_test_idempotency_store(), fast_config());
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let outcome = guard
                .guard("fp", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["C1".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(outcome.into_inner(), vec!["C1".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_second_call_reports_cached() {
        let guard = IdempotencyGuard::new(create_test_idempotency_store(), fast_config());
        let first = guard.guard("fp", || async { Ok(1u32) }).await.unwrap();
        let second = guard.guard("fp", || async { Ok(2u32) }).await.unwrap();
        assert_eq!(first, GuardOutcome::Executed(1));
        assert_eq!(second, GuardOutcome::Cached(1));
    }

    #[tokio::test]
    async fn test_failure_releases_record() {
        let store = create_test_idempotency_store();
        let guard = IdempotencyGuard::new(store.clone(), fast_config());

        let err = guard
            .guard("fp", || async {
                Err::<u32, _>(NotifierError::Delivery {
                    destination: "C2".into(),
                    code: "channel_not_found".into(),
                    detail: String::new(),
                })
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "delivery");
        assert!(store.get("fp").await.unwrap().is_none());

        // A later delivery attempt runs the work again
        let outcome = guard.guard("fp", || async { Ok(7u32) }).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Executed(7));
    }

    #[tokio::test]
    async fn test_in_progress_elsewhere_times_out() {
        let store = create_test_idempotency_store();
        store
            .create_if_absent("fp", "other-worker", Duration::from_secs(60))
            .await
            .unwrap();

        let guard = IdempotencyGuard::new(store, fast_config());
        let err = guard
            .guard("fp", || async { Ok(1u32) })
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::GuardTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_waiter_picks_up_cached_result() {
        let store = create_test_idempotency_store();
        store
            .create_if_absent("fp", "other-worker", Duration::from_secs(60))
            .await
            .unwrap();

        let finisher = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store
                    .complete("fp", "other-worker", "42", Duration::from_secs(3600))
                    .await
                    .unwrap()
            })
        };

        let guard = IdempotencyGuard::new(store, fast_config());
        let outcome = guard.guard("fp", || async { Ok(0u32) }).await.unwrap();
        assert!(finisher.await.unwrap());
        assert_eq!(outcome, GuardOutcome::Cached(42));
    }

    #[tokio::test]
    async fn test_expired_in_progress_is_taken_over() {
        let (store, clock) = create_test_idempotency_store_with_clock(0);
        store
            .create_if_absent("fp", "crashed-worker", Duration::from_secs(60))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(61));

        let guard = IdempotencyGuard::new(store, fast_config());
        let outcome = guard.guard("fp", || async { Ok(5u32) }).await.unwrap();
        assert_eq!(outcome, GuardOutcome::Executed(5));
    }

    #[tokio::test]
    async fn test_lease_outlives_ttl_while_work_runs() {
        let store = create_test_idempotency_store();
        let guard = IdempotencyGuard::new(
            store,
            GuardConfig {
                in_progress_ttl: Duration::from_millis(150),
                lock_wait: Duration::from_secs(2),
                ..fast_config()
            },
        );
        let calls = AtomicUsize::new(0);

        let slow = guard.guard("fp", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(1u32)
        });
        // Arrives after the first TTL would have run out
        let late = async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            guard
                .guard("fp", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(2u32)
                })
                .await
        };
        let (first, second) = tokio::join!(slow, late);

        assert_eq!(first.unwrap(), GuardOutcome::Executed(1));
        assert_eq!(second.unwrap(), GuardOutcome::Cached(1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lost_lease_is_transient_failure() {
        let (store, clock) = create_test_idempotency_store_with_clock(0);
        let guard = IdempotencyGuard::new(store, fast_config());

        let err = guard
            .guard("fp", || async {
                clock.advance(Duration::from_secs(120));
                Ok(1u32)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, NotifierError::CompletionNotPersisted { .. }));
        assert!(err.is_retryable());
    }
}
