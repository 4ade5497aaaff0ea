//! Test assertion helpers - fluent API for verifying test expectations
#![allow(dead_code)] // Test utilities may not all be used in every test

use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;

use chatrooms::{event::EventStream, ChatEvent};

use super::actions::TestClient;

// ============================================================================
// Assertion Helpers
// ============================================================================

const FRAME_TIMEOUT: Duration = Duration::from_secs(1);
const QUIET_PERIOD: Duration = Duration::from_millis(50);

impl TestClient {
    /// Next frame the server wrote to this client, parsed as JSON
    pub async fn next_frame(&mut self) -> Value {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, self.remote.outbound.recv())
            .await
            .unwrap_or_else(|_| panic!("{} should have received a frame", self.username))
            .unwrap_or_else(|| panic!("{}'s socket is gone", self.username));
        serde_json::from_str(&frame).unwrap()
    }

    /// Assert the next frames, in order
    pub async fn expect_frames(&mut self, expected: Vec<Value>) {
        for want in expected {
            let got = self.next_frame().await;
            assert_eq!(got, want, "{} received the wrong frame", self.username);
        }
    }

    pub async fn expect_join(&mut self, username: &str) {
        self.expect_frames(vec![json!({"type": "join", "username": username})])
            .await;
    }

    pub async fn expect_leave(&mut self, username: &str) {
        self.expect_frames(vec![json!({"type": "leave", "username": username})])
            .await;
    }

    pub async fn expect_presence(&mut self, usernames: &[&str]) {
        self.expect_frames(vec![json!({"type": "presence", "usernames": usernames})])
            .await;
    }

    /// Assert nothing arrives for a short while
    pub async fn expect_silence(&mut self) {
        tokio::time::sleep(QUIET_PERIOD).await;
        match self.remote.outbound.try_recv() {
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            Ok(frame) => panic!("{} should not have received {frame}", self.username),
        }
    }
}

/// Next event seen on a bus tap
pub async fn next_event(tap: &mut EventStream) -> ChatEvent {
    let payload = tokio::time::timeout(FRAME_TIMEOUT, tap.next())
        .await
        .expect("an event should have been published")
        .expect("bus closed")
        .unwrap();
    ChatEvent::decode(&payload).unwrap()
}

/// Assert the bus stays quiet for a short while
pub async fn expect_no_more_events(tap: &mut EventStream) {
    if let Ok(Some(payload)) = tokio::time::timeout(QUIET_PERIOD, tap.next()).await {
        let event = payload.ok().and_then(|p| ChatEvent::decode(&p).ok());
        panic!("unexpected event on the bus: {event:?}");
    }
}
