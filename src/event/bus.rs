use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::shared::ChatError;

/// Stream of raw event payloads from one subscription
pub type EventStream = BoxStream<'static, Result<Vec<u8>, ChatError>>;

/// Publish/subscribe channel shared by every server process
///
/// Delivery is best-effort: publishing is fire-and-forget, a subscriber may
/// miss events, and only a single publisher's order is preserved. A
/// subscription ends when the underlying connection drops and cannot be
/// resumed; callers subscribe again.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChatError>;

    async fn subscribe(&self) -> Result<EventStream, ChatError>;

    /// Get a human-readable name for this bus (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Event bus for a single process, backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<Vec<u8>>,
}

impl InMemoryEventBus {
    /// Creates a new event bus; slow subscribers lose events beyond `capacity`
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), ChatError> {
        match self.sender.send(payload) {
            Ok(receiver_count) => {
                debug!(receivers = receiver_count, "Event published");
            }
            Err(_) => {
                debug!("Event published with no receivers");
            }
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<EventStream, ChatError> {
        let receiver = self.sender.subscribe();

        let events = stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => return Some((Ok(payload), receiver)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Subscriber lagged, events dropped");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(events.boxed())
    }

    fn name(&self) -> &'static str {
        "InMemoryEventBus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_published_events() {
        let bus = InMemoryEventBus::new(16);
        let mut first = bus.subscribe().await.unwrap();
        let mut second = bus.subscribe().await.unwrap();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(b"one".to_vec()).await.unwrap();
        bus.publish(b"two".to_vec()).await.unwrap();

        assert_eq!(first.next().await.unwrap().unwrap(), b"one");
        assert_eq!(first.next().await.unwrap().unwrap(), b"two");
        assert_eq!(second.next().await.unwrap().unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_not_an_error() {
        let bus = InMemoryEventBus::new(16);
        assert!(bus.publish(b"lost".to_vec()).await.is_ok());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let bus = InMemoryEventBus::new(2);
        let mut events = bus.subscribe().await.unwrap();

        for i in 0..5u8 {
            bus.publish(vec![i]).await.unwrap();
        }

        // Oldest events were overwritten; the stream keeps going with what is left
        assert_eq!(events.next().await.unwrap().unwrap(), vec![3]);
        assert_eq!(events.next().await.unwrap().unwrap(), vec![4]);
    }
}
