#![allow(dead_code)] // Test utilities may not all be used in every test

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use chatrooms::websockets::{SocketError, SocketWrapper};

// ============================================================================
// Mock Infrastructure
// ============================================================================

/// What the fake client puts on the wire
pub enum MockFrame {
    Text(String),
    Close,
    /// Transport failure, as when the TCP connection is reset
    Error(String),
}

/// In-process stand-in for a websocket, driven from the test through [`MockRemote`]
pub struct MockSocket {
    inbound: mpsc::UnboundedReceiver<MockFrame>,
    outbound: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

/// The client's end of a [`MockSocket`]
pub struct MockRemote {
    pub inbound: mpsc::UnboundedSender<MockFrame>,
    pub outbound: mpsc::UnboundedReceiver<String>,
    pub closed: Arc<AtomicBool>,
}

impl MockSocket {
    pub fn pair() -> (Self, MockRemote) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let socket = Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
            closed: closed.clone(),
        };
        let remote = MockRemote {
            inbound: inbound_tx,
            outbound: outbound_rx,
            closed,
        };
        (socket, remote)
    }
}

#[async_trait]
impl SocketWrapper for MockSocket {
    async fn send_message(&mut self, message: String) -> Result<(), SocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SocketError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .map_err(|e| SocketError::SendFailed(e.to_string()))
    }

    async fn receive_message(&mut self) -> Result<Option<String>, SocketError> {
        match self.inbound.recv().await {
            Some(MockFrame::Text(text)) => Ok(Some(text)),
            Some(MockFrame::Close) | None => Ok(None),
            Some(MockFrame::Error(reason)) => Err(SocketError::ReceiveFailed(reason)),
        }
    }

    async fn close(&mut self) -> Result<(), SocketError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
