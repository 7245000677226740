//! Envelope decoder
//!
//! Unwraps queue record -> notification-topic payload -> alarm payload and
//! normalizes the alarm payload into an [`AlarmTransitionEvent`]. The alarm
//! payload shape is chosen by structural markers:
//!
//! - `AlarmName` at the top level: flat alarm-state payload
//! - `detail-type` and `detail` at the top level: event-bus payload
//!
//! Every failure here is permanent; a malformed record never decodes.

use crate::error::{NotifierError, Result};
use crate::event::{AlarmIdentities, AlarmState, AlarmTransitionEvent, PayloadShape};
use alarm_store::QueueRecord;
use chrono::{DateTime, Utc};
use common::serde_helpers::parse_timestamp;
use serde::Deserialize;
use serde_json::Value;

const NOTIFICATION_TYPE: &str = "Notification";

/// Notification-topic payload carried in a queue record body
#[derive(Debug, Deserialize)]
struct TopicNotification {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "MessageId", default)]
    message_id: Option<String>,
    #[serde(rename = "Message")]
    message: String,
}

/// Direct alarm-state payload
#[derive(Debug, Deserialize)]
struct FlatAlarmPayload {
    #[serde(rename = "AlarmName")]
    alarm_name: String,
    #[serde(rename = "AlarmDescription", default)]
    alarm_description: Option<String>,
    #[serde(rename = "AWSAccountId")]
    account_id: String,
    #[serde(rename = "NewStateValue")]
    new_state_value: String,
    #[serde(rename = "NewStateReason")]
    new_state_reason: String,
    #[serde(rename = "StateChangeTime")]
    state_change_time: String,
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "AlarmArn")]
    alarm_arn: String,
    #[serde(rename = "OldStateValue", default)]
    old_state_value: Option<String>,
}

/// Event-bus state-change event
#[derive(Debug, Deserialize)]
struct EventBusPayload {
    account: String,
    region: String,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    resources: Vec<String>,
    detail: EventBusDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventBusDetail {
    alarm_name: String,
    state: EventBusState,
    #[serde(default)]
    previous_state: Option<EventBusState>,
    #[serde(default)]
    configuration: Option<EventBusConfiguration>,
}

#[derive(Debug, Deserialize)]
struct EventBusState {
    value: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventBusConfiguration {
    #[serde(default)]
    description: Option<String>,
}

/// Alarm payload after shape detection
#[derive(Debug)]
enum AlarmPayload {
    Flat(FlatAlarmPayload),
    EventBus(EventBusPayload),
}

impl AlarmPayload {
    fn detect(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(NotifierError::decode("alarm payload is not a JSON object"));
        };

        if object.contains_key("AlarmName") {
            let payload = serde_json::from_value(value)
                .map_err(|e| NotifierError::decode(format!("flat alarm payload: {}", e)))?;
            Ok(Self::Flat(payload))
        } else if object.contains_key("detail-type") && object.contains_key("detail") {
            let payload = serde_json::from_value(value)
                .map_err(|e| NotifierError::decode(format!("event-bus payload: {}", e)))?;
            Ok(Self::EventBus(payload))
        } else {
            Err(NotifierError::decode("unrecognised payload shape"))
        }
    }

    fn into_event(self) -> Result<AlarmTransitionEvent> {
        match self {
            Self::Flat(p) => Ok(AlarmTransitionEvent {
                identities: AlarmIdentities::single(p.alarm_arn)?,
                new_state: p.new_state_value.parse()?,
                old_state: parse_optional_state(p.old_state_value.as_deref())?,
                timestamp: parse_event_time(&p.state_change_time)?,
                alarm_name: p.alarm_name,
                reason: p.new_state_reason,
                account_id: p.account_id,
                region: p.region,
                description: p.alarm_description,
                shape: PayloadShape::Flat,
            }),
            Self::EventBus(p) => {
                let timestamp = match (p.detail.state.timestamp.as_deref(), p.time.as_deref()) {
                    (Some(ts), _) | (None, Some(ts)) => parse_event_time(ts)?,
                    (None, None) => {
                        return Err(NotifierError::decode("event-bus payload has no timestamp"))
                    },
                };
                Ok(AlarmTransitionEvent {
                    identities: AlarmIdentities::new(p.resources)?,
                    new_state: p.detail.state.value.parse()?,
                    old_state: parse_optional_state(
                        p.detail.previous_state.as_ref().map(|s| s.value.as_str()),
                    )?,
                    timestamp,
                    alarm_name: p.detail.alarm_name,
                    reason: p.detail.state.reason,
                    account_id: p.account,
                    region: p.region,
                    description: p.detail.configuration.and_then(|c| c.description),
                    shape: PayloadShape::EventBus,
                })
            },
        }
    }
}

fn parse_optional_state(value: Option<&str>) -> Result<Option<AlarmState>> {
    value.map(str::parse).transpose()
}

fn parse_event_time(value: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(value)
        .ok_or_else(|| NotifierError::decode(format!("invalid timestamp '{}'", value)))
}

/// Decode an alarm payload (the innermost JSON document)
pub fn decode_alarm_payload(message: &str) -> Result<AlarmTransitionEvent> {
    let value: Value = serde_json::from_str(message)
        .map_err(|e| NotifierError::decode(format!("alarm payload is not JSON: {}", e)))?;
    AlarmPayload::detect(value)?.into_event()
}

/// Extract the alarm payload from a notification-topic document
pub fn unwrap_notification(body: &str) -> Result<String> {
    let notification: TopicNotification = serde_json::from_str(body)
        .map_err(|e| NotifierError::decode(format!("notification envelope: {}", e)))?;
    if notification.kind != NOTIFICATION_TYPE {
        return Err(NotifierError::decode(format!(
            "unexpected notification type '{}'",
            notification.kind
        )));
    }
    tracing::trace!(
        "Unwrapped notification {}",
        notification.message_id.as_deref().unwrap_or("-")
    );
    Ok(notification.message)
}

/// Decode one queue record into exactly one event
pub fn decode_record(record: &QueueRecord) -> Result<AlarmTransitionEvent> {
    let message = unwrap_notification(&record.body)?;
    decode_alarm_payload(&message)
}
