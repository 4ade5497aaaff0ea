use async_trait::async_trait;
use futures::stream::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

use super::bus::{EventBus, EventStream};
use crate::shared::ChatError;

/// Event bus over a single Redis pub/sub channel
///
/// No connection is made until the first publish or subscribe, so a Redis
/// outage at startup is retried by the listener instead of stopping the
/// process.
pub struct RedisEventBus {
    client: redis::Client,
    publisher: OnceCell<ConnectionManager>,
    channel: String,
}

impl RedisEventBus {
    /// Validates `url` without connecting
    pub fn new(url: &str, channel: impl Into<String>) -> Result<Self, ChatError> {
        let client = redis::Client::open(url)
            .map_err(|e| ChatError::Config(format!("Invalid Redis URL: {e}")))?;

        Ok(Self {
            client,
            publisher: OnceCell::new(),
            channel: channel.into(),
        })
    }

    async fn publisher(&self) -> Result<ConnectionManager, ChatError> {
        self.publisher
            .get_or_try_init(|| async {
                let publisher = ConnectionManager::new(self.client.clone())
                    .await
                    .map_err(|e| ChatError::bus(format!("Failed to get publish connection: {e}")))?;
                info!(channel = %self.channel, "Connected Redis event bus publisher");
                Ok::<_, ChatError>(publisher)
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    #[instrument(skip(self, payload), fields(channel = %self.channel, bytes = payload.len()))]
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChatError> {
        let mut publisher = self.publisher().await?;
        let receivers: i64 = publisher
            .publish(&self.channel, payload)
            .await
            .map_err(|e| ChatError::bus(format!("PUBLISH failed: {e}")))?;

        debug!(receivers, "Event published");
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, ChatError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| ChatError::bus(format!("Failed to get pubsub connection: {e}")))?;

        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| ChatError::bus(format!("Failed to subscribe {}: {e}", self.channel)))?;

        info!(channel = %self.channel, "Subscribed to event channel");

        let events = pubsub.into_on_message().map(|message| {
            message
                .get_payload::<Vec<u8>>()
                .map_err(|e| ChatError::bus(format!("Unreadable payload: {e}")))
        });

        Ok(events.boxed())
    }

    fn name(&self) -> &'static str {
        "RedisEventBus"
    }
}
