//! Common test utilities and helpers
#![allow(dead_code)]

use alarm_notifier::dispatch::{ChatClient, ChatError};
use alarm_notifier::idempotency::GuardConfig;
use alarm_notifier::render::RenderedMessage;
use alarm_notifier::{BatchCoordinator, NotifierContext};
use alarm_store::helpers::{create_test_destination_store, create_test_idempotency_store};
use alarm_store::{DestinationRegistry, MemoryDestinationStore, MemoryIdempotencyStore, QueueRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const ACCOUNT: &str = "123456789012";
pub const REGION: &str = "eu-west-1";
pub const STATE_CHANGE_TIME: &str = "2024-01-01T00:00:00.000+0000";

pub fn alarm_arn(name: &str) -> String {
    format!("arn:aws:cloudwatch:{}:{}:alarm:{}", REGION, ACCOUNT, name)
}

/// Chat client that records every post and fails for chosen destinations
#[derive(Default)]
pub struct RecordingChatClient {
    failing: Mutex<HashSet<String>>,
    posts: Mutex<Vec<(String, RenderedMessage)>>,
}

impl RecordingChatClient {
    pub fn fail_for(&self, destination: &str) {
        self.failing.lock().insert(destination.to_string());
    }

    pub fn recover(&self, destination: &str) {
        self.failing.lock().remove(destination);
    }

    /// Destinations in the order posts were attempted
    pub fn destinations(&self) -> Vec<String> {
        self.posts.lock().iter().map(|(d, _)| d.clone()).collect()
    }

    pub fn posts(&self) -> Vec<(String, RenderedMessage)> {
        self.posts.lock().clone()
    }

    pub fn post_count(&self) -> usize {
        self.posts.lock().len()
    }
}

#[async_trait]
impl ChatClient for RecordingChatClient {
    async fn post(&self, destination_id: &str, message: &RenderedMessage) -> Result<(), ChatError> {
        self.posts
            .lock()
            .push((destination_id.to_string(), message.clone()));
        if self.failing.lock().contains(destination_id) {
            return Err(ChatError::new("channel_not_found", "channel_not_found"));
        }
        Ok(())
    }
}

/// In-memory pipeline with direct access to every collaborator
pub struct TestHarness {
    pub idempotency: Arc<MemoryIdempotencyStore>,
    pub destinations: Arc<MemoryDestinationStore>,
    pub chat: Arc<RecordingChatClient>,
    pub context: NotifierContext,
}

impl TestHarness {
    pub fn new() -> Self {
        let idempotency = create_test_idempotency_store();
        let destinations = create_test_destination_store();
        let chat = Arc::new(RecordingChatClient::default());
        let context = NotifierContext::new(idempotency.clone(), destinations.clone(), chat.clone())
            .with_guard(fast_guard());

        Self {
            idempotency,
            destinations,
            chat,
            context,
        }
    }

    pub async fn map(&self, identity: &str, destination: &str) {
        self.destinations.register(identity, destination).await.unwrap();
    }

    pub fn coordinator(&self) -> BatchCoordinator {
        BatchCoordinator::new(&self.context)
    }
}

/// Guard timings short enough for contention tests
pub fn fast_guard() -> GuardConfig {
    GuardConfig {
        retention: Duration::from_secs(3600),
        in_progress_ttl: Duration::from_secs(60),
        lock_wait: Duration::from_millis(300),
        poll_interval: Duration::from_millis(10),
    }
}

pub fn flat_payload(name: &str, state: &str) -> Value {
    json!({
        "AlarmName": name,
        "AlarmDescription": null,
        "AWSAccountId": ACCOUNT,
        "NewStateValue": state,
        "NewStateReason": "Threshold Crossed: 1 datapoint [91.0] was greater than the threshold (90.0).",
        "StateChangeTime": STATE_CHANGE_TIME,
        "Region": REGION,
        "AlarmArn": alarm_arn(name),
        "OldStateValue": "OK",
        "Trigger": {"MetricName": "CPUUtilization", "Threshold": 90.0}
    })
}

pub fn event_bus_payload(name: &str, resources: &[String], state: &str) -> Value {
    json!({
        "version": "0",
        "id": "c4c1c1c9-6542-e61b-6ef0-8c4d36933a92",
        "detail-type": "CloudWatch Alarm State Change",
        "source": "aws.cloudwatch",
        "account": ACCOUNT,
        "time": "2024-01-01T00:00:00Z",
        "region": REGION,
        "resources": resources,
        "detail": {
            "alarmName": name,
            "state": {
                "value": state,
                "reason": "Threshold Crossed",
                "timestamp": "2024-01-01T00:00:00.000+0000"
            },
            "previousState": {"value": "OK", "reason": "", "timestamp": "2023-12-31T23:00:00.000+0000"}
        }
    })
}

/// Notification-topic envelope around an alarm payload
pub fn notification(payload: &Value) -> String {
    json!({
        "Type": "Notification",
        "MessageId": "5a8d1c7e-0000-0000-0000-000000000000",
        "TopicArn": format!("arn:aws:sns:{}:{}:alarms", REGION, ACCOUNT),
        "Message": payload.to_string(),
        "Timestamp": "2024-01-01T00:00:01.000Z"
    })
    .to_string()
}

pub fn queue_record(message_id: &str, payload: &Value) -> QueueRecord {
    QueueRecord::new(message_id, notification(payload))
}
