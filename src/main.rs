use chatrooms::event::{shutdown_signalled, RedisEventBus};
use chatrooms::room::RedisPresenceStore;
use chatrooms::routes::router;
use chatrooms::session::{JwtIdentityResolver, TokenConfig};
use chatrooms::{
    AppState, ChatConfig, ChatError, ChatroomListener, ChatroomRegistry, EventBus,
    InMemoryEventBus, InMemoryPresenceStore, PresenceStore,
};
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatrooms=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chatroom server");

    let config = Arc::new(ChatConfig::from_env()?);

    let (event_bus, presence): (Arc<dyn EventBus>, Arc<dyn PresenceStore>) =
        match &config.redis_url {
            Some(url) => {
                // Connections are opened on first use; the listener retries an unreachable bus
                info!("Using Redis for events and presence");
                let event_bus = RedisEventBus::new(url, config.events_channel.clone())?;
                let presence = RedisPresenceStore::new(url, config.presence_key_prefix.clone())?;
                (Arc::new(event_bus), Arc::new(presence))
            }
            None => {
                warn!("REDIS_URL not set, chat is confined to this process");
                (
                    Arc::new(InMemoryEventBus::default()),
                    Arc::new(InMemoryPresenceStore::new()),
                )
            }
        };

    let registry = Arc::new(ChatroomRegistry::new(presence, config.presence_window));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut listener_task = ChatroomListener::new(
        Arc::clone(&registry),
        Arc::clone(&event_bus),
        &config,
        shutdown_rx.clone(),
    )
    .spawn();

    let tokens = TokenConfig::new(config.jwt_secret.clone(), config.token_expiration_days);
    let app_state = AppState::new(
        registry,
        event_bus,
        Arc::new(JwtIdentityResolver::new(tokens)),
        Arc::clone(&config),
        shutdown_rx.clone(),
    );
    let app = router(app_state);

    let tcp_listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Server running on http://{}", config.bind_addr);

    let mut server_shutdown = shutdown_rx;
    let mut server = tokio::spawn(async move {
        axum::serve(tcp_listener, app)
            .with_graceful_shutdown(async move { shutdown_signalled(&mut server_shutdown).await })
            .await
    });

    let outcome: Result<(), Box<dyn Error>> = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            signal.map_err(Into::into)
        }
        joined = &mut listener_task => Err(listener_failure(joined)),
        served = &mut server => {
            error!("Server stopped unexpectedly");
            return served?.map_err(Into::into);
        }
    };

    let _ = shutdown_tx.send(true);
    server.await??;

    if outcome.is_ok() {
        match tokio::time::timeout(Duration::from_secs(5), listener_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Chatroom listener failed during shutdown"),
            Ok(Err(e)) => warn!(error = %e, "Chatroom listener task panicked during shutdown"),
            Err(_) => warn!("Chatroom listener did not stop in time"),
        }
    }

    info!("Chatroom server stopped");
    outcome
}

/// The listener only returns early when the bus is gone for good
fn listener_failure(joined: Result<Result<(), ChatError>, JoinError>) -> Box<dyn Error> {
    match joined {
        Ok(Err(e)) => {
            error!(error = %e, "Chatroom listener failed");
            e.into()
        }
        Ok(Ok(())) => {
            error!("Chatroom listener stopped before shutdown");
            "chatroom listener stopped before shutdown".into()
        }
        Err(e) => {
            error!(error = %e, "Chatroom listener task panicked");
            e.into()
        }
    }
}
