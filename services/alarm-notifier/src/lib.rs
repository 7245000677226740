//! Alarm notifier
//!
//! Turns monitoring alarm state changes delivered through a queue into chat
//! notifications. Each record is decoded, deduplicated by event fingerprint,
//! resolved to its chat destinations, rendered and delivered. Failed records
//! are reported back to the queue for redelivery.

pub mod api;
pub mod batch;
pub mod config;
pub mod consumer;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod event;
pub mod fingerprint;
pub mod idempotency;
pub mod render;
pub mod resolver;
pub mod slack;

pub use batch::{BatchCoordinator, BatchResponse, PartialFailureReport};
pub use config::Settings;
pub use consumer::QueueConsumer;
pub use context::{NotifierContext, RedisBackends};
pub use dispatch::{ChatClient, ChatError};
pub use error::{NotifierError, Result};
pub use event::{AlarmState, AlarmTransitionEvent};
