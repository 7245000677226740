//! Service configuration
//!
//! Loaded through `common::config_loader`: defaults, then
//! `config/alarm-notifier.yaml`, then an explicit `--config` file, then
//! `ALARM_NOTIFIER_*` environment variables (`__` separates nested keys,
//! e.g. `ALARM_NOTIFIER_CHAT__TOKEN`).

use common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub const SERVICE_NAME: &str = "alarm-notifier";

/// Opaque credential; never printed
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub url: String,
    /// Prefix for every key the notifier writes
    pub key_prefix: String,
    pub max_connections: u32,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "alarm-notifier".to_string(),
            max_connections: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Web API base, without the method name
    pub base_url: String,
    pub token: Secret,
    pub timeout_secs: u64,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            base_url: "https://slack.com/api".to_string(),
            token: Secret::default(),
            timeout_secs: 10,
        }
    }
}

impl ChatSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdempotencySettings {
    /// How long a COMPLETE record suppresses duplicates
    pub retention_secs: u64,
    /// Lease on an IN_PROGRESS record
    pub in_progress_secs: u64,
    /// How long a duplicate waits for an in-flight holder
    pub lock_wait_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for IdempotencySettings {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            in_progress_secs: 60,
            lock_wait_ms: 10_000,
            poll_interval_ms: 250,
        }
    }
}

impl IdempotencySettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn in_progress_ttl(&self) -> Duration {
        Duration::from_secs(self.in_progress_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Run the queue consumer under `serve`
    pub enabled: bool,
    pub batch_size: usize,
    pub wait_secs: u64,
    /// Receives after which a failing record is dead-lettered
    pub max_receive_count: u32,
    /// Records of one batch processed at the same time
    pub concurrency: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 10,
            wait_secs: 20,
            max_receive_count: 5,
            concurrency: 10,
        }
    }
}

impl QueueSettings {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:6010".to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub redis: RedisSettings,
    pub chat: ChatSettings,
    pub idempotency: IdempotencySettings,
    pub queue: QueueSettings,
    pub api: ApiSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load from every configuration layer and validate
    pub fn load(explicit_file: Option<&Path>) -> common::Result<Self> {
        let settings: Settings = common::config_loader::load_config(SERVICE_NAME, explicit_file)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> common::Result<()> {
        let invalid = |msg: &str| -> common::Result<()> {
            Err(common::Error::Config(msg.to_string()))
        };

        if self.queue.batch_size == 0 {
            return invalid("queue.batch_size must be at least 1");
        }
        if self.queue.concurrency == 0 {
            return invalid("queue.concurrency must be at least 1");
        }
        if self.queue.max_receive_count == 0 {
            return invalid("queue.max_receive_count must be at least 1");
        }
        if self.idempotency.in_progress_secs == 0 || self.idempotency.retention_secs == 0 {
            return invalid("idempotency expiries must be positive");
        }
        if self.idempotency.poll_interval_ms == 0 {
            return invalid("idempotency.poll_interval_ms must be positive");
        }
        if self.chat.timeout_secs == 0 {
            return invalid("chat.timeout_secs must be positive");
        }
        // A single send must fit inside one lease period
        if self.idempotency.in_progress_secs <= self.chat.timeout_secs {
            return invalid("idempotency.in_progress_secs must exceed chat.timeout_secs");
        }
        Ok(())
    }
}
