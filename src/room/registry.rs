use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::presence::{Clock, PresenceStore, SystemClock};
use crate::shared::ChatError;
use crate::websockets::{ConnectionHandle, ConnectionId, ServerMessage};

/// Both membership indices. Only ever touched through the registry's mutex so
/// the two sides cannot drift apart.
#[derive(Default)]
struct MembershipIndex {
    /// room -> connection -> (handle, identity)
    by_room: HashMap<String, HashMap<ConnectionId, (ConnectionHandle, String)>>,
    /// connection -> rooms
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

impl MembershipIndex {
    fn insert(&mut self, room: &str, handle: ConnectionHandle, identity: &str) {
        let id = handle.id();
        self.by_room
            .entry(room.to_string())
            .or_default()
            .insert(id, (handle, identity.to_string()));
        self.by_connection
            .entry(id)
            .or_default()
            .insert(room.to_string());
    }

    fn remove(&mut self, room: &str, id: ConnectionId) -> bool {
        let removed = match self.by_room.get_mut(room) {
            Some(members) => {
                let removed = members.remove(&id).is_some();
                if members.is_empty() {
                    self.by_room.remove(room);
                }
                removed
            }
            None => false,
        };

        if let Some(rooms) = self.by_connection.get_mut(&id) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.by_connection.remove(&id);
            }
        }

        removed
    }

    fn has_identity(&self, room: &str, identity: &str) -> bool {
        self.by_room
            .get(room)
            .is_some_and(|members| members.values().any(|(_, name)| name == identity))
    }

    fn remove_connection(&mut self, id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .by_connection
            .remove(&id)
            .map(|rooms| rooms.into_iter().collect())
            .unwrap_or_default();

        for room in &rooms {
            if let Some(members) = self.by_room.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.by_room.remove(room);
                }
            }
        }

        rooms.sort();
        rooms
    }
}

/// In-process authority on which local connections sit in which rooms.
///
/// Membership lives here; presence lives in the shared [`PresenceStore`] so
/// that every process sees the same member list. No lock is held across an
/// await point.
pub struct ChatroomRegistry {
    index: Mutex<MembershipIndex>,
    presence: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
    presence_window: Duration,
}

impl ChatroomRegistry {
    pub fn new(presence: Arc<dyn PresenceStore>, presence_window: Duration) -> Self {
        Self::with_clock(presence, Arc::new(SystemClock), presence_window)
    }

    pub fn with_clock(
        presence: Arc<dyn PresenceStore>,
        clock: Arc<dyn Clock>,
        presence_window: Duration,
    ) -> Self {
        Self {
            index: Mutex::new(MembershipIndex::default()),
            presence,
            clock,
            presence_window,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MembershipIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a connection to a room and touches presence. Re-adding an existing
    /// member only refreshes its identity. The membership change stands even
    /// if the presence touch fails.
    #[instrument(skip(self, handle), fields(connection_id = %handle.id()))]
    pub async fn add_member(
        &self,
        room: &str,
        handle: ConnectionHandle,
        identity: &str,
    ) -> Result<(), ChatError> {
        self.lock().insert(room, handle, identity);
        debug!(room = %room, username = %identity, "Member added");

        self.touch(room, identity).await
    }

    /// Removes a connection from a room. Returns `false` if it was not a member.
    pub fn remove_member(&self, room: &str, id: ConnectionId) -> bool {
        let removed = self.lock().remove(room, id);
        if removed {
            debug!(room = %room, connection_id = %id, "Member removed");
        }
        removed
    }

    /// Drops every membership of a connection and returns the rooms it left,
    /// sorted. Unknown connections yield an empty list.
    pub fn remove_all_memberships(&self, id: ConnectionId) -> Vec<String> {
        let rooms = self.lock().remove_connection(id);
        if !rooms.is_empty() {
            debug!(connection_id = %id, rooms = ?rooms, "All memberships removed");
        }
        rooms
    }

    /// Records activity for an identity in a room. Membership is not required.
    pub async fn touch(&self, room: &str, identity: &str) -> Result<(), ChatError> {
        self.presence
            .touch(room, identity, self.clock.now())
            .await
    }

    /// Ages `identity` out of the room's presence after a departure, so the
    /// next member list no longer shows it. Skipped while another local
    /// connection with the same identity is still in the room.
    pub async fn expire_presence(&self, room: &str, identity: &str) -> Result<(), ChatError> {
        if self.lock().has_identity(room, identity) {
            debug!(room = %room, username = %identity, "Identity still connected, presence kept");
            return Ok(());
        }

        let stale = self.window_start() - 1;
        self.presence.expire(room, identity, stale).await
    }

    fn window_start(&self) -> i64 {
        self.clock.now() - self.presence_window.as_secs() as i64
    }

    /// Identities active within the presence window, ascending.
    pub async fn get_members(&self, room: &str) -> Result<Vec<String>, ChatError> {
        let mut members = self.presence.members_since(room, self.window_start()).await?;
        members.sort();
        members.dedup();
        Ok(members)
    }

    /// Point-in-time copy of the local connections in a room
    pub fn get_sockets(&self, room: &str) -> Vec<ConnectionHandle> {
        self.lock()
            .by_room
            .get(room)
            .map(|members| members.values().map(|(handle, _)| handle.clone()).collect())
            .unwrap_or_default()
    }

    /// Delivers a message to every local connection in a room.
    ///
    /// A connection whose send fails is removed from this room only; the rest
    /// still receive the message. Returns the number of successful deliveries.
    pub fn send_to_all(&self, room: &str, message: &ServerMessage) -> Result<usize, ChatError> {
        let text = message.to_json()?;
        let sockets = self.get_sockets(room);
        let mut delivered = 0;

        for handle in sockets {
            match handle.send(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        room = %room,
                        connection_id = %handle.id(),
                        error = %e,
                        "Send failed, removing connection from room"
                    );
                    self.remove_member(room, handle.id());
                }
            }
        }

        debug!(room = %room, delivered, message_type = message.message_type(), "Fan-out complete");
        Ok(delivered)
    }

    /// Rooms a connection currently belongs to, sorted
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        let mut rooms: Vec<String> = self
            .lock()
            .by_connection
            .get(&id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    pub fn is_member(&self, room: &str, id: ConnectionId) -> bool {
        self.lock()
            .by_room
            .get(room)
            .is_some_and(|members| members.contains_key(&id))
    }

    /// Number of rooms with at least one local connection
    pub fn room_count(&self) -> usize {
        self.lock().by_room.len()
    }

    /// Checks that both indices describe the same memberships
    #[cfg(test)]
    fn indices_mirror(&self) -> bool {
        let index = self.lock();
        let forward = index.by_room.iter().all(|(room, members)| {
            members.keys().all(|id| {
                index
                    .by_connection
                    .get(id)
                    .is_some_and(|rooms| rooms.contains(room))
            })
        });
        let backward = index.by_connection.iter().all(|(id, rooms)| {
            rooms.iter().all(|room| {
                index
                    .by_room
                    .get(room)
                    .is_some_and(|members| members.contains_key(id))
            })
        });
        forward && backward
    }
}
