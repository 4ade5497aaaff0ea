// Cross-process event plumbing
//
// Connections publish chat events to the bus; the listener in every process
// receives them and fans them out to that process's local sockets.

// Public API - what other modules can use
pub use bus::{EventBus, EventStream, InMemoryEventBus};
pub use events::ChatEvent;
pub use listener::{shutdown_signalled, Backoff, ChatroomListener};
pub use redis_bus::RedisEventBus;

// Internal modules
mod bus;
mod events;
mod listener;
mod redis_bus;
