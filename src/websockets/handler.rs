use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ChatConfig;
use crate::event::{ChatEvent, EventBus};
use crate::room::ChatroomRegistry;
use crate::session::Identity;
use crate::shared::{AppState, ChatError};

use super::messages::{ClientAction, ServerMessage};
use super::socket::{ConnectionHandle, ConnectionId, SocketError, SocketWrapper};

/// Drives one client connection from upgrade to close.
///
/// Frames from the client are handled strictly in order. Frames for the client
/// arrive on the outbound queue from any task (usually the listener) and are
/// written by this same loop.
pub struct ConnectionHandler {
    identity: Identity,
    handle: ConnectionHandle,
    socket: Box<dyn SocketWrapper>,
    outbound_receiver: mpsc::UnboundedReceiver<String>,
    registry: Arc<ChatroomRegistry>,
    event_bus: Arc<dyn EventBus>,
    receive_timeout: Duration,
    publish_timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionHandler {
    pub fn new(
        identity: Identity,
        socket: Box<dyn SocketWrapper>,
        registry: Arc<ChatroomRegistry>,
        event_bus: Arc<dyn EventBus>,
        config: &ChatConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (sender, outbound_receiver) = mpsc::unbounded_channel();

        Self {
            identity,
            handle: ConnectionHandle::new(sender),
            socket,
            outbound_receiver,
            registry,
            event_bus,
            receive_timeout: config.receive_timeout,
            publish_timeout: config.publish_timeout,
            shutdown,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Runs the connection until it closes, then tears it down exactly once.
    ///
    /// Teardown also happens if an action panics, or if this future is
    /// dropped before finishing.
    pub async fn run(mut self) -> Result<(), SocketError> {
        let guard = TeardownGuard::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.event_bus),
            self.handle.id(),
            self.identity.to_string(),
            self.publish_timeout,
        );

        info!(
            connection_id = %self.handle.id(),
            username = %self.identity,
            "Connection opened"
        );

        let outcome = AssertUnwindSafe(self.receive_loop()).catch_unwind().await;

        guard.teardown().await;
        let _ = timeout(self.publish_timeout, self.socket.close()).await;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                error!(
                    connection_id = %self.handle.id(),
                    username = %self.identity,
                    "Connection handler panicked"
                );
                Err(SocketError::HandlerPanicked)
            }
        }
    }

    async fn receive_loop(&mut self) -> Result<(), SocketError> {
        loop {
            if *self.shutdown.borrow() {
                debug!(connection_id = %self.handle.id(), "Shutdown observed");
                return Ok(());
            }

            tokio::select! {
                outbound = self.outbound_receiver.recv() => match outbound {
                    Some(message) => self.socket.send_message(message).await?,
                    None => return Ok(()),
                },

                inbound = timeout(self.receive_timeout, self.socket.receive_message()) => match inbound {
                    // Nothing arrived in time; go round and look at shutdown again
                    Err(_elapsed) => continue,
                    Ok(Ok(Some(frame))) => self.handle_frame(&frame).await?,
                    Ok(Ok(None)) => return Ok(()),
                    Ok(Err(e)) => return Err(e),
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: &str) -> Result<(), SocketError> {
        let action = match ClientAction::parse(frame) {
            Ok(action) => action,
            Err(e) => {
                warn!(
                    connection_id = %self.handle.id(),
                    username = %self.identity,
                    error = %e,
                    "Ignoring malformed frame"
                );
                return Ok(());
            }
        };

        debug!(
            username = %self.identity,
            action = action.action_type(),
            room = %action.room_name(),
            "Received action"
        );

        match action {
            ClientAction::Join { room_name } => {
                if let Err(e) = self
                    .registry
                    .add_member(&room_name, self.handle.clone(), self.identity.as_str())
                    .await
                {
                    warn!(room = %room_name, error = %e, "Presence touch failed on join");
                }
                self.publish(ChatEvent::Join {
                    room: room_name,
                    identity: self.identity.to_string(),
                })
                .await;
            }
            ClientAction::Leave { room_name } => {
                if self.registry.remove_member(&room_name, self.handle.id()) {
                    announce_departures(
                        self.registry.as_ref(),
                        self.event_bus.as_ref(),
                        self.identity.as_str(),
                        vec![room_name],
                        self.publish_timeout,
                    )
                    .await;
                } else {
                    debug!(room = %room_name, username = %self.identity, "Leave for a room not joined");
                }
            }
            ClientAction::Ping { room_name } => {
                self.touch(&room_name).await;
                match ServerMessage::Pong.to_json() {
                    Ok(pong) => self.socket.send_message(pong).await?,
                    Err(e) => warn!(error = %e, "Failed to build pong"),
                }
            }
            ClientAction::Message { room_name, message } => {
                self.touch(&room_name).await;
                self.publish(ChatEvent::Broadcast {
                    room: room_name,
                    identity: self.identity.to_string(),
                    message,
                })
                .await;
            }
        }

        Ok(())
    }

    // `&mut self` keeps the future Send; the socket is not Sync
    async fn touch(&mut self, room: &str) {
        if let Err(e) = self.registry.touch(room, self.identity.as_str()).await {
            warn!(room = %room, username = %self.identity, error = %e, "Presence touch failed");
        }
    }

    /// Publishes an event. Failures are logged; local state is not rolled back.
    async fn publish(&mut self, event: ChatEvent) {
        publish_event(self.event_bus.as_ref(), &event, self.publish_timeout).await;
    }
}

async fn publish_event(event_bus: &dyn EventBus, event: &ChatEvent, publish_timeout: Duration) {
    let payload = match event.encode() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Failed to encode event");
            return;
        }
    };

    match timeout(publish_timeout, event_bus.publish(payload)).await {
        Ok(Ok(())) => {
            debug!(
                event_type = event.event_type(),
                room = %event.room(),
                "Event published"
            );
        }
        Ok(Err(e)) => {
            warn!(
                event_type = event.event_type(),
                room = %event.room(),
                error = %e,
                "Failed to publish event"
            );
        }
        Err(_) => {
            warn!(
                event_type = event.event_type(),
                room = %event.room(),
                "Publish timed out"
            );
        }
    }
}

/// For each room left: ages the identity out of presence, then publishes the
/// leave, so listeners reading presence for the leave no longer see it.
async fn announce_departures(
    registry: &ChatroomRegistry,
    event_bus: &dyn EventBus,
    identity: &str,
    rooms: Vec<String>,
    publish_timeout: Duration,
) {
    for room in rooms {
        match timeout(publish_timeout, registry.expire_presence(&room, identity)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(room = %room, username = %identity, error = %e, "Failed to expire presence");
            }
            Err(_) => warn!(room = %room, username = %identity, "Presence expiry timed out"),
        }

        let event = ChatEvent::Leave {
            room,
            identity: identity.to_string(),
        };
        publish_event(event_bus, &event, publish_timeout).await;
    }
}

struct TeardownState {
    registry: Arc<ChatroomRegistry>,
    event_bus: Arc<dyn EventBus>,
    connection_id: ConnectionId,
    identity: String,
    publish_timeout: Duration,
}

/// Removes a connection's memberships and announces its departures, once.
///
/// [`TeardownGuard::teardown`] is the normal path. If the guard is dropped
/// without it (the owning task was aborted or unwound), `Drop` removes the
/// memberships synchronously and hands the leave events to a spawned task.
struct TeardownGuard {
    state: Option<TeardownState>,
}

impl TeardownGuard {
    fn new(
        registry: Arc<ChatroomRegistry>,
        event_bus: Arc<dyn EventBus>,
        connection_id: ConnectionId,
        identity: String,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            state: Some(TeardownState {
                registry,
                event_bus,
                connection_id,
                identity,
                publish_timeout,
            }),
        }
    }

    async fn teardown(mut self) {
        if let Some(state) = self.state.take() {
            let rooms = state.registry.remove_all_memberships(state.connection_id);
            info!(
                connection_id = %state.connection_id,
                username = %state.identity,
                rooms = ?rooms,
                "Connection closed"
            );
            announce_departures(
                state.registry.as_ref(),
                state.event_bus.as_ref(),
                &state.identity,
                rooms,
                state.publish_timeout,
            )
            .await;
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };

        let rooms = state.registry.remove_all_memberships(state.connection_id);
        warn!(
            connection_id = %state.connection_id,
            username = %state.identity,
            rooms = ?rooms,
            "Connection dropped before teardown"
        );
        if rooms.is_empty() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    announce_departures(
                        state.registry.as_ref(),
                        state.event_bus.as_ref(),
                        &state.identity,
                        rooms,
                        state.publish_timeout,
                    )
                    .await;
                });
            }
            Err(_) => {
                error!(
                    connection_id = %state.connection_id,
                    "No runtime left to publish leave events"
                );
            }
        }
    }
}

/// WebSocket endpoint for chat
///
/// GET /v1/chat with a JWT in `Authorization: Bearer` or `Sec-WebSocket-Protocol`.
/// Requests without a resolvable identity are refused before the upgrade.
#[instrument(name = "chat_websocket", skip(state, headers, ws))]
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ChatError> {
    let identity = state
        .identity_resolver
        .resolve(&headers)
        .await
        .ok_or_else(|| {
            warn!("Refusing chat connection without identity");
            ChatError::Forbidden
        })?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    // Browsers only accept the upgrade if the offered protocol is echoed back
    let ws = match headers
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|h| h.to_str().ok())
    {
        Some(protocol) => ws.protocols([protocol.to_owned()]),
        None => ws,
    };

    info!(username = %identity, "Chat connection accepted");

    Ok(ws.on_upgrade(move |socket| handle_websocket_connection(socket, identity, state)))
}

/// Handle the upgraded WebSocket connection
async fn handle_websocket_connection(socket: WebSocket, identity: Identity, state: AppState) {
    let handler = ConnectionHandler::new(
        identity.clone(),
        Box::new(socket),
        Arc::clone(&state.registry),
        Arc::clone(&state.event_bus),
        &state.config,
        state.shutdown.clone(),
    );
    let connection_id = handler.connection_id();

    match handler.run().await {
        Ok(()) => {
            info!(
                connection_id = %connection_id,
                username = %identity,
                "WebSocket connection closed cleanly"
            );
        }
        Err(e) => {
            warn!(
                connection_id = %connection_id,
                username = %identity,
                error = %e,
                "WebSocket connection error"
            );
        }
    }
}
