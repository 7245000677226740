//! Process-wide dependencies
//!
//! Store and chat clients are constructed once at startup and handed to the
//! batch coordinator through [`NotifierContext`].

use crate::config::Settings;
use crate::dispatch::ChatClient;
use crate::idempotency::GuardConfig;
use crate::slack::SlackClient;
use alarm_store::{
    DestinationRegistry, DestinationStore, IdempotencyStore, KeySpace, RecordQueue,
    RedisDestinationStore, RedisIdempotencyStore, RedisQueue, SystemTimeProvider,
};
use anyhow::Context;
use common::redis::{RedisClient, RedisConfig};
use std::sync::Arc;
use tracing::info;

/// Dependencies of the notification pipeline
#[derive(Clone)]
pub struct NotifierContext {
    pub idempotency: Arc<dyn IdempotencyStore>,
    pub destinations: Arc<dyn DestinationStore>,
    pub chat: Arc<dyn ChatClient>,
    pub guard: GuardConfig,
    /// Records of one batch processed at the same time
    pub concurrency: usize,
}

impl NotifierContext {
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        destinations: Arc<dyn DestinationStore>,
        chat: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            idempotency,
            destinations,
            chat,
            guard: GuardConfig::default(),
            concurrency: 10,
        }
    }

    pub fn with_guard(mut self, guard: GuardConfig) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// Redis-backed stores sharing one pool
pub struct RedisBackends {
    pub client: Arc<RedisClient>,
    pub idempotency: Arc<RedisIdempotencyStore>,
    pub destinations: Arc<RedisDestinationStore>,
    pub queue: Arc<RedisQueue>,
}

impl RedisBackends {
    /// Connect and verify the server is reachable
    pub async fn connect(settings: &Settings) -> anyhow::Result<Self> {
        let config = RedisConfig {
            max_connections: settings.redis.max_connections,
            ..RedisConfig::from_url(settings.redis.url.clone())
        };
        let client = Arc::new(
            RedisClient::with_config(config)
                .await
                .context("Failed to connect to Redis")?,
        );
        info!("Connected to Redis");

        let keyspace = KeySpace::new(settings.redis.key_prefix.clone());
        Ok(Self {
            idempotency: Arc::new(RedisIdempotencyStore::new(
                client.clone(),
                keyspace.clone(),
                Arc::new(SystemTimeProvider),
            )),
            destinations: Arc::new(RedisDestinationStore::new(client.clone(), keyspace.clone())),
            queue: Arc::new(RedisQueue::new(client.clone(), keyspace)),
            client,
        })
    }

    pub fn registry(&self) -> Arc<dyn DestinationRegistry> {
        self.destinations.clone()
    }

    pub fn queue(&self) -> Arc<dyn RecordQueue> {
        self.queue.clone()
    }

    /// Pipeline context over these stores and the configured chat API
    pub fn notifier_context(&self, settings: &Settings) -> anyhow::Result<NotifierContext> {
        if settings.chat.token.is_empty() {
            tracing::warn!("Chat token is empty; every delivery will be rejected");
        }
        let chat = Arc::new(SlackClient::new(&settings.chat)?);

        Ok(NotifierContext::new(
            self.idempotency.clone(),
            self.destinations.clone(),
            chat,
        )
        .with_guard(GuardConfig::from(&settings.idempotency))
        .with_concurrency(settings.queue.concurrency))
    }
}
