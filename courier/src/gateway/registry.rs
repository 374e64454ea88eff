//! Connection registry.
//!
//! In-memory index of live connections: by handle, by user and by named room.
//! Each connection owns an unbounded outbound queue drained by its socket task,
//! so sends never block on a slow client.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::auth::Identity;
use super::protocol::ServerEvent;
use super::room::Room;

/// Connection handle id.
pub type ConnectionId = Uuid;

/// Receiving half of a connection's outbound queue.
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// One live client session.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub username: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<ServerEvent>,
    cancel: CancellationToken,
    rooms: Mutex<HashSet<String>>,
}

impl ConnectionHandle {
    /// Queue an event for this connection. `false` once the socket task is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    /// Cancelled when the connection is force-closed.
    pub fn cancelled(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Named rooms this connection has joined.
    pub fn rooms(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.lock().iter().cloned().collect();
        rooms.sort();
        rooms
    }
}

/// Concurrency-safe index of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    users: DashMap<String, HashSet<ConnectionId>>,
    rooms: DashMap<String, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authenticated connection and place it in its user's room.
    pub fn register(&self, identity: &Identity) -> (Arc<ConnectionHandle>, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = Arc::new(ConnectionHandle {
            id: Uuid::new_v4(),
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            connected_at: Utc::now(),
            sender,
            cancel: CancellationToken::new(),
            rooms: Mutex::new(HashSet::new()),
        });

        self.connections.insert(handle.id, Arc::clone(&handle));
        self.users
            .entry(handle.user_id.clone())
            .or_default()
            .insert(handle.id);

        debug!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            "Connection registered"
        );

        (handle, receiver)
    }

    /// Remove a connection from every index. Unknown or already removed
    /// handles are a no-op.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&id)?;

        if let Entry::Occupied(mut entry) = self.users.entry(handle.user_id.clone()) {
            entry.get_mut().remove(&id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }

        let joined: Vec<String> = handle.rooms.lock().drain().collect();
        for room in joined {
            self.remove_room_member(&room, id);
        }

        debug!(
            connection_id = %id,
            user_id = %handle.user_id,
            "Connection unregistered"
        );

        Some(handle)
    }

    fn remove_room_member(&self, room: &str, id: ConnectionId) {
        if let Entry::Occupied(mut entry) = self.rooms.entry(room.to_string()) {
            entry.get_mut().remove(&id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Add a connection to a named room. `false` if the connection is unknown.
    pub fn join(&self, id: ConnectionId, room: &str) -> bool {
        // Holding the handle keeps a concurrent unregister from missing the new room.
        let Some(handle) = self.connections.get(&id) else {
            return false;
        };
        handle.rooms.lock().insert(room.to_string());
        self.rooms.entry(room.to_string()).or_default().insert(id);
        true
    }

    /// Remove a connection from a named room. `false` if the connection is unknown.
    pub fn leave(&self, id: ConnectionId, room: &str) -> bool {
        let Some(handle) = self.connections.get(&id) else {
            return false;
        };
        handle.rooms.lock().remove(room);
        self.remove_room_member(room, id);
        true
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|h| Arc::clone(h.value()))
    }

    fn handles(&self, ids: impl IntoIterator<Item = ConnectionId>) -> Vec<Arc<ConnectionHandle>> {
        ids.into_iter().filter_map(|id| self.get(id)).collect()
    }

    /// Current members of a room.
    pub fn members(&self, room: &Room) -> Vec<Arc<ConnectionHandle>> {
        let ids: Vec<ConnectionId> = match room {
            Room::User(user_id) => self
                .users
                .get(user_id)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
            Room::Named(name) => self
                .rooms
                .get(name)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default(),
        };
        self.handles(ids)
    }

    /// Emit to every member of `room`; returns how many connections accepted it.
    pub fn send_to_room(&self, room: &Room, event: &ServerEvent) -> usize {
        self.members(room)
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count()
    }

    /// Emit to all connections of a user. No connections is a silent no-op.
    pub fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        self.send_to_room(&Room::for_user(user_id), event)
    }

    pub fn send_to_users<S: AsRef<str>>(&self, user_ids: &[S], event: &ServerEvent) -> usize {
        user_ids
            .iter()
            .map(|user_id| self.send_to_user(user_id.as_ref(), event))
            .sum()
    }

    /// Emit to every live connection regardless of room membership.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let all: Vec<Arc<ConnectionHandle>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        all.iter().filter(|handle| handle.send(event.clone())).count()
    }

    /// Force-close and remove every connection of a user.
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let handles = self.members(&Room::for_user(user_id));
        for handle in &handles {
            handle.cancel.cancel();
            self.unregister(handle.id);
        }
        handles.len()
    }

    /// Force-close and remove every connection.
    pub fn disconnect_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|entry| *entry.key()).collect();
        let mut closed = 0;
        for id in ids {
            if let Some(handle) = self.unregister(id) {
                handle.cancel.cancel();
                closed += 1;
            }
        }
        closed
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    /// Online user ids, sorted.
    pub fn online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.users.get(user_id).map(|set| set.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            username: format!("{} name", user_id),
        }
    }

    #[test]
    fn test_register_and_unregister_twice_restores_baseline() {
        let registry = ConnectionRegistry::new();
        let (handle, _rx) = registry.register(&identity("u1"));
        registry.join(handle.id, "team");

        assert!(registry.is_user_online("u1"));
        assert_eq!(registry.online_user_count(), 1);
        assert_eq!(registry.room_count(), 1);

        assert!(registry.unregister(handle.id).is_some());
        assert!(registry.unregister(handle.id).is_none());
        assert!(registry.unregister(Uuid::new_v4()).is_none());

        assert!(!registry.is_user_online("u1"));
        assert_eq!(registry.online_user_count(), 0);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.room_count(), 0);
        assert!(registry.online_user_ids().is_empty());
    }

    #[test]
    fn test_user_with_two_connections() {
        let registry = ConnectionRegistry::new();
        let (first, mut rx1) = registry.register(&identity("u1"));
        let (_second, mut rx2) = registry.register(&identity("u1"));
        assert_eq!(registry.user_connection_count("u1"), 2);
        assert_eq!(registry.online_user_count(), 1);

        let event = ServerEvent::new_notification(serde_json::json!({"title": "hi"}));
        assert_eq!(registry.send_to_user("u1", &event), 2);
        assert_eq!(rx1.try_recv().unwrap(), event);
        assert_eq!(rx2.try_recv().unwrap(), event);

        registry.unregister(first.id);
        assert!(registry.is_user_online("u1"));
        assert_eq!(registry.send_to_user("u1", &event), 1);
        assert_eq!(rx2.try_recv().unwrap(), event);
    }

    #[test]
    fn test_send_to_offline_user_is_noop() {
        let registry = ConnectionRegistry::new();
        let event = ServerEvent::new_notification(serde_json::json!({}));
        assert_eq!(registry.send_to_user("ghost", &event), 0);
        assert_eq!(registry.send_to_users(&["a", "b"], &event), 0);
    }

    #[test]
    fn test_named_room_scoping() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = registry.register(&identity("a"));
        let (_b, mut rx_b) = registry.register(&identity("b"));
        assert!(registry.join(a.id, "team"));
        assert!(!registry.join(Uuid::new_v4(), "team"));

        let event = ServerEvent::new("team_update", serde_json::json!({"n": 1}));
        assert_eq!(registry.send_to_room(&Room::Named("team".to_string()), &event), 1);
        assert_eq!(rx_a.try_recv().unwrap(), event);
        assert!(rx_b.try_recv().is_err());
        assert_eq!(a.rooms(), vec!["team".to_string()]);

        assert!(registry.leave(a.id, "team"));
        assert_eq!(registry.send_to_room(&Room::Named("team".to_string()), &event), 0);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn test_user_room_is_not_a_named_room() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = registry.register(&identity("a"));
        let (_b, mut rx_b) = registry.register(&identity("b"));
        // A named room called "b" is separate from user b's own room.
        registry.join(a.id, "b");

        let event = ServerEvent::new_notification(serde_json::json!({}));
        assert_eq!(registry.send_to_user("b", &event), 1);
        assert_eq!(rx_b.try_recv().unwrap(), event);
    }

    #[test]
    fn test_broadcast_reaches_everyone() {
        let registry = ConnectionRegistry::new();
        let receivers: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|u| registry.register(&identity(u)).1)
            .collect();

        let event = ServerEvent::new_announcement(serde_json::json!({"title": "all"}));
        assert_eq!(registry.broadcast(&event), 3);
        for mut rx in receivers {
            assert_eq!(rx.try_recv().unwrap(), event);
        }
    }

    #[test]
    fn test_disconnect_user_cancels_and_removes() {
        let registry = ConnectionRegistry::new();
        let (first, _rx1) = registry.register(&identity("u1"));
        let (second, _rx2) = registry.register(&identity("u1"));
        let (other, _rx3) = registry.register(&identity("u2"));

        assert_eq!(registry.disconnect_user("u1"), 2);
        assert!(first.cancelled().is_cancelled());
        assert!(second.cancelled().is_cancelled());
        assert!(!other.cancelled().is_cancelled());
        assert!(!registry.is_user_online("u1"));
        assert_eq!(registry.online_user_ids(), vec!["u2".to_string()]);

        assert_eq!(registry.disconnect_user("u1"), 0);
        assert_eq!(registry.disconnect_all(), 1);
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let registry = ConnectionRegistry::new();
        let (_handle, rx) = registry.register(&identity("u1"));
        drop(rx);
        let event = ServerEvent::new_notification(serde_json::json!({}));
        assert_eq!(registry.send_to_user("u1", &event), 0);
    }

    #[test]
    fn test_concurrent_register_unregister_same_user() {
        let registry = Arc::new(ConnectionRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let (handle, _rx) = registry.register(&identity("shared"));
                        registry.join(handle.id, "room");
                        registry.unregister(handle.id);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.online_user_count(), 0);
        assert_eq!(registry.room_count(), 0);
    }
}
