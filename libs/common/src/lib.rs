//! Alarm notifier basic library
//!
//! Provides functions shared by the notifier crates, including:
//! - pooled Redis client
//! - logging initialisation
//! - layered configuration loading
//! - graceful shutdown signalling

#[cfg(feature = "redis")]
pub mod redis;

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod serde_helpers;
pub mod shutdown;

pub use error::{Error, Result};
pub use logging::{LogFormat, LoggingConfig};

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;

// Pre-import common types
pub mod prelude {
    #[cfg(feature = "redis")]
    pub use crate::redis::{RedisClient, RedisConfig};
}
