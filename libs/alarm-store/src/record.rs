//! Queue record model
//!
//! The record shape follows the queue's batch-delivery contract: an id, an
//! opaque string body and string-valued system attributes. Unknown top-level
//! keys are carried through untouched so a record survives redelivery intact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// System attribute counting how many times a record was handed to a consumer
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";

/// One queue record as delivered to the batch coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    pub message_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt_handle: Option<String>,

    pub body: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl QueueRecord {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            receipt_handle: None,
            body: body.into(),
            attributes: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Receive count reported by the queue, 1 when the attribute is absent or unparsable
    pub fn receive_count(&self) -> u32 {
        self.attributes
            .get(RECEIVE_COUNT_ATTRIBUTE)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(1)
    }

    pub fn set_receive_count(&mut self, count: u32) {
        self.attributes
            .insert(RECEIVE_COUNT_ATTRIBUTE.to_string(), count.to_string());
    }

    /// Copy with the receive count bumped by one
    pub fn next_delivery(&self) -> Self {
        let mut next = self.clone();
        next.set_receive_count(self.receive_count().saturating_add(1));
        next
    }
}

/// A record handed out by [`crate::RecordQueue::receive`]
///
/// `raw` is the exact stored encoding. Backends use it to remove the entry
/// from their in-flight list, so it must be passed back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedRecord {
    pub record: QueueRecord,
    pub raw: String,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_sqs_record() {
        let json = r#"{
            "messageId": "059f36b4-87a3-44ab-83d2-661975830a7d",
            "receiptHandle": "AQEBwJnKyrHigUMZj6rYigCgxlaS3SLy0a",
            "body": "{\"Type\":\"Notification\"}",
            "attributes": {
                "ApproximateReceiveCount": "3",
                "SentTimestamp": "1545082649183"
            },
            "messageAttributes": {},
            "eventSource": "aws:sqs",
            "awsRegion": "eu-west-1"
        }"#;

        let record: QueueRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.message_id, "059f36b4-87a3-44ab-83d2-661975830a7d");
        assert_eq!(record.receive_count(), 3);
        assert_eq!(record.extra["eventSource"], "aws:sqs");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["awsRegion"], "eu-west-1");
        assert_eq!(back["attributes"]["SentTimestamp"], "1545082649183");
    }

    #[test]
    fn test_receive_count_defaults_to_one() {
        let record: QueueRecord =
            serde_json::from_str(r#"{"messageId": "m1", "body": "{}"}"#).unwrap();
        assert_eq!(record.receive_count(), 1);

        let mut garbled = record.clone();
        garbled
            .attributes
            .insert(RECEIVE_COUNT_ATTRIBUTE.to_string(), "lots".to_string());
        assert_eq!(garbled.receive_count(), 1);
    }

    #[test]
    fn test_next_delivery_increments() {
        let mut record = QueueRecord::new("m1", "{}");
        record.set_receive_count(4);
        let next = record.next_delivery();
        assert_eq!(next.receive_count(), 5);
        assert_eq!(record.receive_count(), 4);
        assert_eq!(next.message_id, record.message_id);
    }

    #[test]
    fn test_missing_body_rejected() {
        assert!(serde_json::from_str::<QueueRecord>(r#"{"messageId": "m1"}"#).is_err());
    }
}
