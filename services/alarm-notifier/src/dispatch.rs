//! Delivery dispatcher
//!
//! Sends one rendered message to each destination in order. The first failed
//! send aborts the remaining destinations and fails the whole event, so the
//! idempotency record is never completed for a partially delivered event.

use crate::error::{NotifierError, Result};
use crate::render::RenderedMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};

/// Failure reported by a chat backend for one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatError {
    /// Short machine-readable code (`channel_not_found`, `http_500`, `timeout`, ...)
    pub code: String,
    pub detail: String,
}

impl ChatError {
    pub fn new(code: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.detail)
    }
}

impl std::error::Error for ChatError {}

/// Chat delivery backend
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    /// Post `message` to one destination
    async fn post(
        &self,
        destination_id: &str,
        message: &RenderedMessage,
    ) -> std::result::Result<(), ChatError>;
}

/// Destinations that accepted the message, in send order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
}

pub struct Dispatcher {
    client: Arc<dyn ChatClient>,
}

impl Dispatcher {
    pub fn new(client: Arc<dyn ChatClient>) -> Self {
        Self { client }
    }

    /// Send to every destination; stops at the first failure
    pub async fn deliver(
        &self,
        message: &RenderedMessage,
        destinations: &[String],
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::default();

        for destination in destinations {
            info!(destination = %destination, "Sending alarm notification");

            if let Err(e) = self.client.post(destination, message).await {
                error!(
                    destination = %destination,
                    code = %e.code,
                    blocks = %message.blocks_json(),
                    delivered = report.delivered.len(),
                    "Sending alarm notification failed: {}",
                    e.detail
                );
                return Err(NotifierError::Delivery {
                    destination: destination.clone(),
                    code: e.code,
                    detail: e.detail,
                });
            }

            info!(destination = %destination, "Sent alarm notification");
            report.delivered.push(destination.clone());
        }

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::render::{Block, RenderedMessage};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedClient {
        failing: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn post(
            &self,
            destination_id: &str,
            _message: &RenderedMessage,
        ) -> std::result::Result<(), ChatError> {
            self.calls.lock().push(destination_id.to_string());
            if self.failing.iter().any(|d| d == destination_id) {
                return Err(ChatError::new("channel_not_found", "no such channel"));
            }
            Ok(())
        }
    }

    fn message() -> RenderedMessage {
        RenderedMessage {
            text: "Alarm: CPUHigh".into(),
            blocks: vec![Block::Divider],
        }
    }

    fn destinations(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_delivers_in_order() {
        let client = Arc::new(ScriptedClient::default());
        let dispatcher = Dispatcher::new(client.clone());

        let report = dispatcher
            .deliver(&message(), &destinations(&["C1", "C2"]))
            .await
            .unwrap();
        assert_eq!(report.delivered, vec!["C1", "C2"]);
        assert_eq!(*client.calls.lock(), vec!["C1", "C2"]);
    }

    #[tokio::test]
    async fn test_first_failure_aborts_rest() {
        let client = Arc::new(ScriptedClient {
            failing: vec!["C2".into()],
            ..Default::default()
        });
        let dispatcher = Dispatcher::new(client.clone());

        let err = dispatcher
            .deliver(&message(), &destinations(&["C1", "C2", "C3"]))
            .await
            .unwrap_err();
        match err {
            NotifierError::Delivery {
                destination, code, ..
            } => {
                assert_eq!(destination, "C2");
                assert_eq!(code, "channel_not_found");
            },
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(*client.calls.lock(), vec!["C1", "C2"]);
    }

    #[tokio::test]
    async fn test_no_destinations_is_empty_report() {
        let dispatcher = Dispatcher::new(Arc::new(ScriptedClient::default()));
        let report = dispatcher.deliver(&message(), &[]).await.unwrap();
        assert!(report.delivered.is_empty());
    }
}
