//! Batch coordinator
//!
//! Runs decode -> guard -> resolve -> render -> deliver for every record of a
//! batch. Records are isolated from each other: a failure marks only its own
//! record in the [`PartialFailureReport`]. Retrying is left to the queue.

use crate::context::NotifierContext;
use crate::dispatch::Dispatcher;
use crate::envelope::decode_record;
use crate::error::{NotifierError, Result};
use crate::event::AlarmTransitionEvent;
use crate::fingerprint::fingerprint;
use crate::idempotency::{GuardOutcome, IdempotencyGuard};
use crate::render::render;
use crate::resolver::DestinationResolver;
use alarm_store::QueueRecord;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Progress of one record through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStage {
    Received,
    Decoded,
    GuardAcquired,
    Resolved,
    Rendered,
    Delivered,
    Acked,
    Failed,
}

/// Delivery result for one alarm identity of an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityOutcome {
    pub alarm_identity: String,
    pub delivered: Vec<String>,
}

/// Handling summary of one event; this is what the idempotency record caches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub identities: Vec<IdentityOutcome>,
}

impl EventOutcome {
    pub fn delivery_count(&self) -> usize {
        self.identities.iter().map(|i| i.delivered.len()).sum()
    }
}

/// A record that finished without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSuccess {
    pub index: usize,
    pub record_id: String,
    pub fingerprint: String,
    pub outcome: EventOutcome,
    /// True when an earlier delivery already handled this event
    pub duplicate: bool,
}

/// A record that must be redelivered or dead-lettered
#[derive(Debug)]
pub struct RecordFailure {
    pub index: usize,
    pub record_id: String,
    /// Last stage the record reached before failing
    pub stage: RecordStage,
    pub error: NotifierError,
}

impl RecordFailure {
    pub fn is_permanent(&self) -> bool {
        self.error.is_permanent()
    }
}

/// Batch result; records not listed as failures are durably handled
#[derive(Debug, Default)]
pub struct PartialFailureReport {
    pub succeeded: Vec<RecordSuccess>,
    /// Sorted by batch position
    pub failures: Vec<RecordFailure>,
}

impl PartialFailureReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Identifiers the queue must redeliver, in batch order
    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.record_id.as_str()).collect()
    }

    pub fn is_failed(&self, index: usize) -> bool {
        self.failures.iter().any(|f| f.index == index)
    }

    pub fn failure(&self, index: usize) -> Option<&RecordFailure> {
        self.failures.iter().find(|f| f.index == index)
    }

    /// Wire form of the partial batch response
    pub fn to_response(&self) -> BatchResponse {
        BatchResponse {
            batch_item_failures: self
                .failures
                .iter()
                .map(|f| BatchItemFailure {
                    item_identifier: f.record_id.clone(),
                })
                .collect(),
        }
    }
}

/// Partial batch response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: String,
}

/// Drives the pipeline over record batches
pub struct BatchCoordinator {
    guard: IdempotencyGuard,
    resolver: DestinationResolver,
    dispatcher: Dispatcher,
    concurrency: usize,
}

impl BatchCoordinator {
    pub fn new(context: &NotifierContext) -> Self {
        Self {
            guard: IdempotencyGuard::new(context.idempotency.clone(), context.guard),
            resolver: DestinationResolver::new(context.destinations.clone()),
            dispatcher: Dispatcher::new(context.chat.clone()),
            concurrency: context.concurrency.max(1),
        }
    }

    /// Process a batch; never fails as a whole
    pub async fn process(&self, records: &[QueueRecord]) -> PartialFailureReport {
        let pending: Vec<_> = records
            .iter()
            .enumerate()
            .map(|(index, record)| async move { (index, self.process_record(index, record).await) })
            .collect();
        let mut results: Vec<(usize, std::result::Result<RecordSuccess, RecordFailure>)> =
            stream::iter(pending)
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut report = PartialFailureReport::default();
        for (_, result) in results {
            match result {
                Ok(success) => report.succeeded.push(success),
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            records = records.len(),
            failed = report.failures.len(),
            "Processed batch"
        );
        report
    }

    async fn process_record(
        &self,
        index: usize,
        record: &QueueRecord,
    ) -> std::result::Result<RecordSuccess, RecordFailure> {
        let span = info_span!(
            "record",
            record_id = %record.message_id,
            receive_count = record.receive_count(),
            fingerprint = tracing::field::Empty,
        );

        async move {
            let mut stage = RecordStage::Received;
            match self.handle_record(record, &mut stage).await {
                Ok((fingerprint, outcome)) => {
                    let duplicate = outcome.is_cached();
                    debug!(stage = ?RecordStage::Acked, duplicate, "Record handled");
                    Ok(RecordSuccess {
                        index,
                        record_id: record.message_id.clone(),
                        fingerprint,
                        outcome: outcome.into_inner(),
                        duplicate,
                    })
                },
                Err(error) => {
                    if error.is_permanent() {
                        error!(stage = ?stage, kind = error.kind(), "Record failed permanently: {}", error);
                    } else {
                        warn!(stage = ?stage, kind = error.kind(), "Record failed, will be retried: {}", error);
                    }
                    Err(RecordFailure {
                        index,
                        record_id: record.message_id.clone(),
                        stage,
                        error,
                    })
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn handle_record(
        &self,
        record: &QueueRecord,
        stage: &mut RecordStage,
    ) -> Result<(String, GuardOutcome<EventOutcome>)> {
        let event = decode_record(record)?;
        *stage = RecordStage::Decoded;

        let fingerprint = fingerprint(&event);
        tracing::Span::current().record("fingerprint", fingerprint.as_str());
        debug!(
            alarm_name = %event.alarm_name,
            alarm_identity = event.identities.primary(),
            new_state = %event.new_state,
            "Decoded alarm event"
        );

        let outcome = self
            .guard
            .guard(&fingerprint, || self.handle_event(&event, stage))
            .await?;
        if outcome.is_cached() {
            info!("Event already handled, skipping delivery");
        }
        *stage = RecordStage::Delivered;

        Ok((fingerprint, outcome))
    }

    /// Resolve, render and deliver for every identity of the event
    ///
    /// Identities are handled independently and destinations are not
    /// deduplicated across them: a destination mapped to two identities
    /// receives the message twice. A failed identity does not stop the
    /// others; the event fails afterwards with the first error so the guard
    /// record is released.
    async fn handle_event(
        &self,
        event: &AlarmTransitionEvent,
        stage: &mut RecordStage,
    ) -> Result<EventOutcome> {
        *stage = RecordStage::GuardAcquired;
        info!(
            alarm_name = %event.alarm_name,
            new_state = %event.new_state,
            identities = event.identities.len(),
            "Handling alarm event"
        );

        let mut resolved = Vec::with_capacity(event.identities.len());
        for alarm_identity in event.identities.iter() {
            resolved.push((alarm_identity, self.resolver.resolve(alarm_identity).await));
        }
        *stage = RecordStage::Resolved;

        let message = render(event);
        *stage = RecordStage::Rendered;

        let mut outcome = EventOutcome::default();
        let mut errors = Vec::new();
        for (alarm_identity, destinations) in resolved {
            let destinations = match destinations {
                Ok(destinations) => destinations,
                Err(e) => {
                    errors.push(e);
                    continue;
                },
            };

            if destinations.is_empty() {
                warn!(alarm_identity, "No chat destinations defined for alarm");
                outcome.identities.push(IdentityOutcome {
                    alarm_identity: alarm_identity.to_string(),
                    delivered: Vec::new(),
                });
                continue;
            }

            match self
                .dispatcher
                .deliver(&message, &destinations)
                .instrument(info_span!("deliver", alarm_identity))
                .await
            {
                Ok(report) => outcome.identities.push(IdentityOutcome {
                    alarm_identity: alarm_identity.to_string(),
                    delivered: report.delivered,
                }),
                Err(e) => {
                    warn!(alarm_identity, "Delivery failed for alarm identity: {}", e);
                    errors.push(e);
                },
            }
        }

        if errors.is_empty() {
            return Ok(outcome);
        }
        warn!(
            failed_identities = errors.len(),
            delivered = outcome.delivery_count(),
            "Event not fully delivered"
        );
        Err(errors.remove(0))
    }
}
