// Public API - what other modules can use
pub use presence::{Clock, InMemoryPresenceStore, ManualClock, PresenceStore, SystemClock};
pub use redis_presence::RedisPresenceStore;
pub use registry::ChatroomRegistry;

// Internal modules
mod presence;
mod redis_presence;
mod registry;
