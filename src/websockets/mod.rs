// Public API
pub use handler::{websocket_handler, ConnectionHandler};
pub use messages::{ClientAction, ServerMessage};
pub use socket::{ConnectionHandle, ConnectionId, SocketError, SocketWrapper};

// Internal modules
mod handler;
mod messages;
mod socket;
