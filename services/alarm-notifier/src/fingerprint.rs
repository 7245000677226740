//! Event fingerprints
//!
//! A fingerprint is SHA-256 over a canonical JSON encoding of the event
//! content. Transport metadata (record id, receive count, topic message id,
//! arrival time) never contributes, so redeliveries of one transition collide.

use crate::event::AlarmTransitionEvent;
use chrono::SecondsFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Field order here is the canonical order; do not reorder
#[derive(Serialize)]
struct CanonicalEvent<'a> {
    alarm_name: &'a str,
    identities: &'a [String],
    new_state: &'a str,
    reason: &'a str,
    account_id: &'a str,
    region: &'a str,
    timestamp: String,
}

/// Lower-case hex SHA-256 of the event's canonical encoding
pub fn fingerprint(event: &AlarmTransitionEvent) -> String {
    let canonical = CanonicalEvent {
        alarm_name: &event.alarm_name,
        identities: event.identities.as_slice(),
        new_state: event.new_state.as_str(),
        reason: &event.reason,
        account_id: &event.account_id,
        region: &event.region,
        timestamp: event
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true),
    };

    let mut hasher = Sha256::new();
    // Serializing borrowed strings and a slice cannot fail
    if let Ok(bytes) = serde_json::to_vec(&canonical) {
        hasher.update(&bytes);
    }
    hex::encode(hasher.finalize())
}
