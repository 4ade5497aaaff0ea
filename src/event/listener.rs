use futures::{FutureExt, StreamExt};
use rand::Rng;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{bus::EventBus, events::ChatEvent};
use crate::config::ChatConfig;
use crate::room::ChatroomRegistry;
use crate::shared::ChatError;
use crate::websockets::ServerMessage;

/// Exponential backoff with +/-20% jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::rng().random_range(0.8..=1.2);
        let delay = self.current.mul_f64(jitter).min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Resolves once `shutdown` reads `true`. Never resolves if the sender is gone
/// without having signalled.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// The one per-process subscriber to the event bus.
///
/// Every event published by any process lands here and is fanned out to the
/// local members of its room. This is the only path by which remote activity
/// reaches local sockets, so the loop survives bad payloads, handler faults
/// and dropped subscriptions.
pub struct ChatroomListener {
    registry: Arc<ChatroomRegistry>,
    event_bus: Arc<dyn EventBus>,
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ChatroomListener {
    pub fn new(
        registry: Arc<ChatroomRegistry>,
        event_bus: Arc<dyn EventBus>,
        config: &ChatConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            event_bus,
            max_retries: config.listener_max_retries,
            initial_backoff: config.listener_initial_backoff,
            max_backoff: config.listener_max_backoff,
            shutdown,
        }
    }

    /// Spawns the listen loop as a background task
    pub fn spawn(self) -> JoinHandle<Result<(), ChatError>> {
        tokio::spawn(self.run())
    }

    /// Subscribes and dispatches until shutdown. Returns an error only when the
    /// bus could not be subscribed to `max_retries` times in a row.
    pub async fn run(mut self) -> Result<(), ChatError> {
        let bus_name = self.event_bus.name();
        let mut backoff = Backoff::new(self.initial_backoff, self.max_backoff);
        let mut failures: u32 = 0;

        info!(bus = bus_name, "Starting chatroom listener");

        loop {
            match self.event_bus.subscribe().await {
                Ok(mut events) => {
                    info!(bus = bus_name, "Chatroom listener subscribed");
                    failures = 0;
                    backoff.reset();

                    let mut shutdown = self.shutdown.clone();
                    loop {
                        tokio::select! {
                            _ = shutdown_signalled(&mut shutdown) => {
                                info!(bus = bus_name, "Chatroom listener stopping");
                                return Ok(());
                            }
                            next = events.next() => match next {
                                Some(Ok(payload)) => self.dispatch(&payload).await,
                                Some(Err(e)) => {
                                    warn!(bus = bus_name, error = %e, "Subscription failed");
                                    break;
                                }
                                None => {
                                    warn!(bus = bus_name, "Subscription ended");
                                    break;
                                }
                            },
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.max_retries {
                        error!(
                            bus = bus_name,
                            attempts = failures,
                            error = %e,
                            "Giving up on event bus"
                        );
                        return Err(ChatError::BusUnavailable { attempts: failures });
                    }
                    warn!(
                        bus = bus_name,
                        attempt = failures,
                        error = %e,
                        "Failed to subscribe to event bus"
                    );
                }
            }

            let delay = backoff.next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "Resubscribing after backoff");
            tokio::select! {
                _ = shutdown_signalled(&mut self.shutdown) => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Decodes and handles one payload. Nothing that goes wrong here escapes.
    pub async fn dispatch(&self, payload: &[u8]) {
        let event = match ChatEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable event");
                return;
            }
        };

        let event_type = event.event_type();
        let room = event.room().to_string();

        match AssertUnwindSafe(self.handle_event(event)).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(room = %room, event_type, error = %e, "Failed to handle event");
            }
            Err(_) => {
                error!(room = %room, event_type, "Event handler panicked");
            }
        }
    }

    /// Fans an event out to the local members of its room
    pub async fn handle_event(&self, event: ChatEvent) -> Result<(), ChatError> {
        debug!(event = ?event, "Handling chat event");

        match event {
            ChatEvent::Join { room, identity } => {
                self.registry
                    .send_to_all(&room, &ServerMessage::Join { username: identity })?;
                self.send_presence(&room).await
            }
            ChatEvent::Leave { room, identity } => {
                self.registry
                    .send_to_all(&room, &ServerMessage::Leave { username: identity })?;
                self.send_presence(&room).await
            }
            ChatEvent::Broadcast {
                room,
                identity,
                message,
            } => {
                self.registry.send_to_all(
                    &room,
                    &ServerMessage::Broadcast {
                        username: identity,
                        message,
                    },
                )?;
                Ok(())
            }
        }
    }

    async fn send_presence(&self, room: &str) -> Result<(), ChatError> {
        let usernames = self.registry.get_members(room).await?;
        self.registry
            .send_to_all(room, &ServerMessage::Presence { usernames })?;
        Ok(())
    }
}
