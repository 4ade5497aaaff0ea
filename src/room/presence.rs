use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, instrument};

use crate::shared::ChatError;

/// Source of unix timestamps (seconds) for presence bookkeeping
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock backed by chrono
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, at: i64) {
        self.now.store(at, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Shared record of who was recently active in which room.
///
/// Multiple processes point at the same store so they agree on presence even
/// when join/leave events are dropped on the bus. Records are never deleted:
/// departures are back-dated out of the window and readers filter by timestamp.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Upserts the last-activity timestamp of `identity` in `room`
    async fn touch(&self, room: &str, identity: &str, at: i64) -> Result<(), ChatError>;

    /// Rewrites an existing record of `identity` in `room` to `at`. Used to
    /// back-date a departed identity out of the window; unknown identities
    /// are left absent.
    async fn expire(&self, room: &str, identity: &str, at: i64) -> Result<(), ChatError>;

    /// Returns every identity in `room` touched at or after `since`, in no particular order
    async fn members_since(&self, room: &str, since: i64) -> Result<Vec<String>, ChatError>;
}

/// Single-process presence store for development and testing
pub struct InMemoryPresenceStore {
    rooms: Mutex<HashMap<String, HashMap<String, i64>>>,
}

impl Default for InMemoryPresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    #[instrument(skip(self))]
    async fn touch(&self, room: &str, identity: &str, at: i64) -> Result<(), ChatError> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms
            .entry(room.to_string())
            .or_default()
            .insert(identity.to_string(), at);

        debug!(room = %room, username = %identity, at, "Presence touched");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn expire(&self, room: &str, identity: &str, at: i64) -> Result<(), ChatError> {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(last_seen) = rooms.get_mut(room).and_then(|scores| scores.get_mut(identity)) {
            *last_seen = at;
            debug!(room = %room, username = %identity, at, "Presence expired");
        }
        Ok(())
    }

    async fn members_since(&self, room: &str, since: i64) -> Result<Vec<String>, ChatError> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        let members = rooms
            .get(room)
            .map(|scores| {
                scores
                    .iter()
                    .filter(|(_, at)| **at >= since)
                    .map(|(identity, _)| identity.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(members)
    }
}
