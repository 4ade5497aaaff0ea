// Library crate for the chatrooms server
// This file exposes the public API for integration tests

pub mod config;
pub mod event;
pub mod room;
pub mod routes;
pub mod session;
pub mod shared;
pub mod websockets;

// Re-export commonly used types for easier access in tests
pub use config::ChatConfig;
pub use event::{ChatEvent, ChatroomListener, EventBus, InMemoryEventBus};
pub use room::{ChatroomRegistry, InMemoryPresenceStore, PresenceStore};
pub use session::Identity;
pub use shared::{AppState, ChatError};
pub use websockets::{ConnectionHandler, ServerMessage, SocketWrapper};
