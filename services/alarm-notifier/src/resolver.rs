//! Destination resolver

use crate::error::{NotifierError, Result};
use alarm_store::DestinationStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps one alarm identity to its subscribed chat destinations
pub struct DestinationResolver {
    store: Arc<dyn DestinationStore>,
}

impl DestinationResolver {
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self { store }
    }

    /// Destinations in store order; duplicates are passed through, an empty result is valid
    pub async fn resolve(&self, alarm_identity: &str) -> Result<Vec<String>> {
        debug!(alarm_identity, "Retrieving destinations for alarm");

        let destinations = self.store.query(alarm_identity).await.map_err(|source| {
            warn!(alarm_identity, "Destination lookup failed: {}", source);
            NotifierError::Resolution {
                alarm_identity: alarm_identity.to_string(),
                source,
            }
        })?;

        debug!(
            alarm_identity,
            count = destinations.len(),
            "Retrieved destinations for alarm"
        );
        Ok(destinations)
    }
}
