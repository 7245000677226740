//! Queue consumer integration tests over the in-memory queue

use alarm_notifier::config::QueueSettings;
use alarm_notifier::consumer::{QueueConsumer, SettleSummary};
use alarm_store::helpers::create_test_queue;
use alarm_store::{MemoryQueue, QueueRecord, ReceivedRecord, RecordQueue, StoreError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;
use common::{alarm_arn, flat_payload, queue_record, TestHarness};

fn settings(max_receive_count: u32) -> QueueSettings {
    QueueSettings {
        batch_size: 10,
        wait_secs: 0,
        max_receive_count,
        ..QueueSettings::default()
    }
}

fn consumer(harness: &TestHarness, queue: &Arc<MemoryQueue>, max_receive_count: u32) -> QueueConsumer {
    QueueConsumer::new(
        queue.clone(),
        Arc::new(harness.coordinator()),
        settings(max_receive_count),
    )
}

#[tokio::test]
async fn test_settles_each_record_by_outcome() {
    let harness = TestHarness::new();
    harness.map(&alarm_arn("CPUHigh"), "C1").await;
    harness.map(&alarm_arn("DiskFull"), "C-broken").await;
    harness.chat.fail_for("C-broken");

    let queue = create_test_queue();
    queue
        .push(&queue_record("ok", &flat_payload("CPUHigh", "ALARM")))
        .await
        .unwrap();
    queue.push(&QueueRecord::new("garbage", "{")).await.unwrap();
    queue
        .push(&queue_record("retry", &flat_payload("DiskFull", "ALARM")))
        .await
        .unwrap();

    let summary = consumer(&harness, &queue, 5)
        .run_once(Duration::ZERO)
        .await
        .unwrap();

    assert_eq!(
        summary,
        SettleSummary {
            acked: 1,
            redelivered: 1,
            dead_lettered: 1,
            unsettled: 0,
        }
    );
    assert_eq!(queue.in_flight_len(), 0);
    assert_eq!(queue.pending_len(), 1);

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message_id, "garbage");
}

/// Memory queue whose first ack fails with a connection error
struct AckFailsOnce {
    inner: Arc<MemoryQueue>,
    failed: AtomicBool,
}

#[async_trait]
impl RecordQueue for AckFailsOnce {
    async fn push(&self, record: &QueueRecord) -> alarm_store::Result<()> {
        self.inner.push(record).await
    }

    async fn receive(&self, max: usize, wait: Duration) -> alarm_store::Result<Vec<ReceivedRecord>> {
        self.inner.receive(max, wait).await
    }

    async fn ack(&self, received: &ReceivedRecord) -> alarm_store::Result<()> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::ConnectionError("connection reset".into()));
        }
        self.inner.ack(received).await
    }

    async fn redeliver(&self, received: &ReceivedRecord) -> alarm_store::Result<()> {
        self.inner.redeliver(received).await
    }

    async fn dead_letter(&self, received: &ReceivedRecord) -> alarm_store::Result<()> {
        self.inner.dead_letter(received).await
    }

    async fn recover(&self) -> alarm_store::Result<usize> {
        self.inner.recover().await
    }

    async fn dead_letters(&self) -> alarm_store::Result<Vec<QueueRecord>> {
        self.inner.dead_letters().await
    }
}

#[tokio::test]
async fn test_failed_ack_does_not_strand_the_batch() {
    let harness = TestHarness::new();
    harness.map(&alarm_arn("CPUHigh"), "C1").await;
    harness.map(&alarm_arn("DiskFull"), "C2").await;

    let inner = create_test_queue();
    inner
        .push(&queue_record("m-1", &flat_payload("CPUHigh", "ALARM")))
        .await
        .unwrap();
    inner
        .push(&queue_record("m-2", &flat_payload("DiskFull", "ALARM")))
        .await
        .unwrap();
    let queue = Arc::new(AckFailsOnce {
        inner: inner.clone(),
        failed: AtomicBool::new(false),
    });
    let consumer = QueueConsumer::new(queue, Arc::new(harness.coordinator()), settings(5));

    let first = consumer.run_once(Duration::ZERO).await.unwrap();
    assert_eq!(first.acked, 1);
    assert_eq!(first.unsettled, 1);
    assert_eq!(inner.in_flight_len(), 1);

    // The held ack is retried before the next receive
    let second = consumer.run_once(Duration::ZERO).await.unwrap();
    assert_eq!(second.acked, 1);
    assert_eq!(second.unsettled, 0);
    assert_eq!(inner.in_flight_len(), 0);
    assert_eq!(inner.pending_len(), 0);

    let mut sent = harness.chat.destinations();
    sent.sort();
    assert_eq!(sent, vec!["C1", "C2"]);
}

#[tokio::test]
async fn test_transient_failure_dead_lettered_at_max_receive_count() {
    let harness = TestHarness::new();
    harness.map(&alarm_arn("DiskFull"), "C-broken").await;
    harness.chat.fail_for("C-broken");

    let queue = create_test_queue();
    queue
        .push(&queue_record("retry", &flat_payload("DiskFull", "ALARM")))
        .await
        .unwrap();
    let consumer = consumer(&harness, &queue, 3);

    for _ in 0..2 {
        let summary = consumer.run_once(Duration::ZERO).await.unwrap();
        assert_eq!(summary.redelivered, 1);
    }
    let summary = consumer.run_once(Duration::ZERO).await.unwrap();
    assert_eq!(summary.dead_lettered, 1);
    assert_eq!(queue.pending_len(), 0);

    let dead = queue.dead_letters().await.unwrap();
    assert_eq!(dead[0].receive_count(), 3);
    assert_eq!(harness.chat.post_count(), 3);
}

#[tokio::test]
async fn test_empty_queue_settles_nothing() {
    let harness = TestHarness::new();
    let queue = create_test_queue();

    let summary = consumer(&harness, &queue, 5)
        .run_once(Duration::from_millis(20))
        .await
        .unwrap();
    assert_eq!(summary.total(), 0);
}

#[tokio::test]
async fn test_run_processes_until_cancelled() {
    let harness = TestHarness::new();
    harness.map(&alarm_arn("CPUHigh"), "C1").await;
    let queue = create_test_queue();

    let token = CancellationToken::new();
    let consumer = QueueConsumer::new(
        queue.clone(),
        Arc::new(harness.coordinator()),
        QueueSettings {
            wait_secs: 1,
            ..settings(5)
        },
    );
    let handle = {
        let token = token.clone();
        tokio::spawn(async move { consumer.run(token).await })
    };

    queue
        .push(&queue_record("m-1", &flat_payload("CPUHigh", "ALARM")))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.chat.post_count() == 0 || queue.in_flight_len() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("record was not consumed");

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("consumer did not stop")
        .unwrap();

    assert_eq!(harness.chat.destinations(), vec!["C1"]);
    assert_eq!(queue.pending_len(), 0);
}
