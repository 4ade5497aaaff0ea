#![allow(dead_code)] // Test utilities may not all be used in every test

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use chatrooms::{
    event::EventStream,
    room::ManualClock,
    ChatConfig, ChatError, ChatroomListener, ChatroomRegistry, EventBus, InMemoryEventBus,
    InMemoryPresenceStore,
};

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

/// One simulated server process: registry, presence, bus and a running listener
pub struct TestSetup {
    pub registry: Arc<ChatroomRegistry>,
    pub event_bus: Arc<InMemoryEventBus>,
    pub presence: Arc<InMemoryPresenceStore>,
    pub clock: Arc<ManualClock>,
    pub config: ChatConfig,
    pub shutdown: watch::Sender<bool>,
    pub listener_handle: JoinHandle<Result<(), ChatError>>,
}

pub struct TestSetupBuilder {
    config: ChatConfig,
    start_time: i64,
    shared: Option<(Arc<InMemoryEventBus>, Arc<InMemoryPresenceStore>, Arc<ManualClock>)>,
}

impl TestSetupBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatConfig {
                // Short enough that shutdown is noticed quickly
                receive_timeout: Duration::from_millis(20),
                publish_timeout: Duration::from_millis(500),
                listener_initial_backoff: Duration::from_millis(1),
                listener_max_backoff: Duration::from_millis(10),
                ..ChatConfig::default()
            },
            start_time: 1_700_000_000,
            shared: None,
        }
    }

    pub fn with_presence_window(mut self, window: Duration) -> Self {
        self.config.presence_window = window;
        self
    }

    /// Another process attached to the same bus, presence store and clock
    pub fn sharing_backends_with(mut self, other: &TestSetup) -> Self {
        self.shared = Some((
            other.event_bus.clone(),
            other.presence.clone(),
            other.clock.clone(),
        ));
        self
    }

    pub async fn build(self) -> TestSetup {
        let (event_bus, presence, clock) = self.shared.unwrap_or_else(|| {
            (
                Arc::new(InMemoryEventBus::new(256)),
                Arc::new(InMemoryPresenceStore::new()),
                Arc::new(ManualClock::new(self.start_time)),
            )
        });
        let registry = Arc::new(ChatroomRegistry::with_clock(
            presence.clone(),
            clock.clone(),
            self.config.presence_window,
        ));
        let subscribers_before = event_bus.subscriber_count();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let listener_handle = ChatroomListener::new(
            registry.clone(),
            event_bus.clone(),
            &self.config,
            shutdown_rx,
        )
        .spawn();

        // Events published before the listener subscribes would be lost
        tokio::time::timeout(Duration::from_secs(1), async {
            while event_bus.subscriber_count() == subscribers_before {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("listener should subscribe");

        TestSetup {
            registry,
            event_bus,
            presence,
            clock,
            config: self.config,
            shutdown,
            listener_handle,
        }
    }
}

impl TestSetup {
    /// A raw view of everything published to the bus from now on
    pub async fn bus_tap(&self) -> EventStream {
        self.event_bus.subscribe().await.unwrap()
    }
}
