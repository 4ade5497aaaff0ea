#![allow(dead_code)] // Test utilities may not all be used in every test

use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::task::JoinHandle;

use chatrooms::{
    websockets::{ConnectionId, SocketError},
    ConnectionHandler, Identity,
};

use super::mocks::{MockFrame, MockRemote, MockSocket};
use super::setup::TestSetup;

// ============================================================================
// Action Helpers
// ============================================================================

/// A connected client driving its own [`ConnectionHandler`] task
pub struct TestClient {
    pub username: String,
    pub connection_id: ConnectionId,
    pub remote: MockRemote,
    task: JoinHandle<Result<(), SocketError>>,
}

impl TestSetup {
    /// Accept a connection for `username` and start its handler
    pub fn connect(&self, username: &str) -> TestClient {
        let (socket, remote) = MockSocket::pair();
        let handler = ConnectionHandler::new(
            Identity::new(username).unwrap(),
            Box::new(socket),
            self.registry.clone(),
            self.event_bus.clone(),
            &self.config,
            self.shutdown.subscribe(),
        );
        let connection_id = handler.connection_id();

        TestClient {
            username: username.to_string(),
            connection_id,
            remote,
            task: tokio::spawn(handler.run()),
        }
    }

    /// Move the presence clock forward
    pub fn advance_clock(&self, secs: i64) {
        self.clock.advance(secs);
    }

    pub fn signal_shutdown(&self) {
        self.shutdown.send(true).unwrap();
    }
}

impl TestClient {
    pub fn send_raw(&self, frame: &str) {
        self.remote
            .inbound
            .send(MockFrame::Text(frame.to_string()))
            .unwrap();
    }

    pub fn join(&self, room: &str) {
        self.send_raw(&json!({"type": "join", "room_name": room}).to_string());
    }

    pub fn leave(&self, room: &str) {
        self.send_raw(&json!({"type": "leave", "room_name": room}).to_string());
    }

    pub fn ping(&self, room: &str) {
        self.send_raw(&json!({"type": "ping", "room_name": room}).to_string());
    }

    pub fn say(&self, room: &str, message: &str) {
        self.send_raw(
            &json!({"type": "message", "room_name": room, "message": message}).to_string(),
        );
    }

    /// Client sends a close frame
    pub fn hang_up(&self) {
        self.remote.inbound.send(MockFrame::Close).unwrap();
    }

    /// Transport dies under the connection
    pub fn break_transport(&self) {
        self.remote
            .inbound
            .send(MockFrame::Error("connection reset by peer".to_string()))
            .unwrap();
    }

    /// Kill the handler task without letting it finish
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn socket_closed(&self) -> bool {
        self.remote.closed.load(Ordering::SeqCst)
    }

    /// Wait for the handler task to end and return its result
    pub async fn finished(&mut self) -> Result<(), SocketError> {
        tokio::time::timeout(Duration::from_secs(1), &mut self.task)
            .await
            .expect("handler should finish")
            .expect("handler task should not be cancelled")
    }
}
