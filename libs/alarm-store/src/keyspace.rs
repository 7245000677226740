//! Redis KeySpace Configuration
//!
//! All keys live under one prefix so several notifier deployments can share
//! a Redis instance.

/// Redis key naming for the notifier stores
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("alarm-notifier")
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `{prefix}:idempotency:{fingerprint}` (string, JSON record, PX expiry)
    pub fn idempotency_key(&self, fingerprint: &str) -> String {
        format!("{}:idempotency:{}", self.prefix, fingerprint)
    }

    /// `{prefix}:destinations:{alarm_identity}` (sorted set, all scores 0)
    pub fn destinations_key(&self, alarm_identity: &str) -> String {
        format!("{}:destinations:{}", self.prefix, alarm_identity)
    }

    /// `{prefix}:queue` (list of pending records)
    pub fn queue_key(&self) -> String {
        format!("{}:queue", self.prefix)
    }

    /// `{prefix}:queue:processing` (list of records currently held by a consumer)
    pub fn processing_key(&self) -> String {
        format!("{}:queue:processing", self.prefix)
    }

    /// `{prefix}:queue:dead-letter` (list of records that exhausted delivery)
    pub fn dead_letter_key(&self) -> String {
        format!("{}:queue:dead-letter", self.prefix)
    }
}
