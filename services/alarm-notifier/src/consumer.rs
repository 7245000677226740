//! Queue consumer
//!
//! Receives record batches, hands them to the [`BatchCoordinator`] and
//! settles each record from the failure report:
//!
//! - not failed: ack
//! - permanent failure, or receive count at the limit: dead letter
//! - otherwise: redeliver
//!
//! A settle call that fails is kept and retried before the next receive, so
//! one queue error never strands the rest of the batch.

use crate::batch::BatchCoordinator;
use crate::config::QueueSettings;
use alarm_store::{QueueRecord, ReceivedRecord, RecordQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Pause after a failed receive before polling again
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Per-batch settlement counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettleSummary {
    pub acked: usize,
    pub redelivered: usize,
    pub dead_lettered: usize,
    /// Settle calls that failed and are held for the next round
    pub unsettled: usize,
}

impl SettleSummary {
    /// Records settled on the queue
    pub fn total(&self) -> usize {
        self.acked + self.redelivered + self.dead_lettered
    }

    fn merge(self, other: SettleSummary) -> Self {
        Self {
            acked: self.acked + other.acked,
            redelivered: self.redelivered + other.redelivered,
            dead_lettered: self.dead_lettered + other.dead_lettered,
            unsettled: self.unsettled + other.unsettled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Redeliver,
    DeadLetter,
}

pub struct QueueConsumer {
    queue: Arc<dyn RecordQueue>,
    coordinator: Arc<BatchCoordinator>,
    settings: QueueSettings,
    unsettled: Mutex<Vec<(ReceivedRecord, Settlement)>>,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn RecordQueue>,
        coordinator: Arc<BatchCoordinator>,
        settings: QueueSettings,
    ) -> Self {
        Self {
            queue,
            coordinator,
            settings,
            unsettled: Mutex::new(Vec::new()),
        }
    }

    /// Retry held settlements, then receive, process and settle one batch
    pub async fn run_once(&self, wait: Duration) -> alarm_store::Result<SettleSummary> {
        let retried = self.retry_unsettled().await;
        let batch = self.queue.receive(self.settings.batch_size, wait).await?;
        Ok(retried.merge(self.process_batch(batch).await))
    }

    async fn process_batch(&self, batch: Vec<ReceivedRecord>) -> SettleSummary {
        if batch.is_empty() {
            return SettleSummary::default();
        }

        let records: Vec<QueueRecord> = batch.iter().map(|r| r.record.clone()).collect();
        let report = self.coordinator.process(&records).await;

        let mut summary = SettleSummary::default();
        for (index, received) in batch.into_iter().enumerate() {
            let settlement = match report.failure(index) {
                None => Settlement::Ack,
                Some(failure) => {
                    let receive_count = received.record.receive_count();
                    if failure.is_permanent() || receive_count >= self.settings.max_receive_count {
                        warn!(
                            record_id = %received.record.message_id,
                            receive_count,
                            kind = failure.error.kind(),
                            "Moving record to dead letters"
                        );
                        Settlement::DeadLetter
                    } else {
                        Settlement::Redeliver
                    }
                },
            };
            summary = summary.merge(self.settle(received, settlement).await);
        }

        summary
    }

    /// Apply one settlement; a failed call is held for retry
    async fn settle(&self, received: ReceivedRecord, settlement: Settlement) -> SettleSummary {
        let result = match settlement {
            Settlement::Ack => self.queue.ack(&received).await,
            Settlement::Redeliver => self.queue.redeliver(&received).await,
            Settlement::DeadLetter => self.queue.dead_letter(&received).await,
        };

        let mut summary = SettleSummary::default();
        match result {
            Ok(()) => match settlement {
                Settlement::Ack => summary.acked = 1,
                Settlement::Redeliver => summary.redelivered = 1,
                Settlement::DeadLetter => summary.dead_lettered = 1,
            },
            Err(e) => {
                error!(
                    record_id = %received.record.message_id,
                    settlement = ?settlement,
                    "Failed to settle record: {}", e
                );
                self.unsettled.lock().await.push((received, settlement));
                summary.unsettled = 1;
            },
        }
        summary
    }

    async fn retry_unsettled(&self) -> SettleSummary {
        let held = std::mem::take(&mut *self.unsettled.lock().await);
        let mut summary = SettleSummary::default();
        for (received, settlement) in held {
            summary = summary.merge(self.settle(received, settlement).await);
        }
        summary
    }

    /// Consume until `shutdown` is cancelled
    ///
    /// A batch that has been received is always processed and settled before
    /// the loop checks for shutdown again.
    pub async fn run(&self, shutdown: CancellationToken) {
        match self.queue.recover().await {
            Ok(0) => {},
            Ok(moved) => info!("Recovered {} in-flight records from a previous run", moved),
            Err(e) => error!("Failed to recover in-flight records: {}", e),
        }

        info!(
            batch_size = self.settings.batch_size,
            max_receive_count = self.settings.max_receive_count,
            "Queue consumer started"
        );

        while !shutdown.is_cancelled() {
            let retried = self.retry_unsettled().await;
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.queue.receive(self.settings.batch_size, self.settings.wait()) => received,
            };

            let summary = match received {
                Ok(batch) => retried.merge(self.process_batch(batch).await),
                Err(e) => {
                    error!("Queue error: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {},
                    }
                    continue;
                },
            };

            if summary.unsettled > 0 {
                warn!(
                    acked = summary.acked,
                    redelivered = summary.redelivered,
                    dead_lettered = summary.dead_lettered,
                    unsettled = summary.unsettled,
                    "Batch partly settled, retrying the rest"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {},
                }
            } else if summary.total() > 0 {
                info!(
                    acked = summary.acked,
                    redelivered = summary.redelivered,
                    dead_lettered = summary.dead_lettered,
                    "Settled batch"
                );
            }
        }

        let held = self.unsettled.lock().await.len();
        if held > 0 {
            warn!("{} records left unsettled at shutdown; recovered on next start", held);
        }
        info!("Queue consumer stopped");
    }
}
