//! The push gateway.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::auth::{AuthError, Identity, IdentityVerifier};
use super::protocol::{ClientMessage, ServerEvent};
use super::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, EventReceiver};
use super::room::Room;
use crate::Result;

/// Gateway tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server ping period; a client that misses one ping is dropped.
    pub heartbeat_secs: u64,
    /// Delay between a maintenance notice and the forced disconnect.
    pub maintenance_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            maintenance_grace_secs: 5,
        }
    }
}

impl GatewayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn maintenance_grace(&self) -> Duration {
        Duration::from_secs(self.maintenance_grace_secs)
    }
}

/// Authenticated, live delivery to connected clients.
///
/// Delivery is best-effort: an offline user simply misses the push.
pub struct PushGateway {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn IdentityVerifier>,
    config: GatewayConfig,
}

impl PushGateway {
    pub fn new(verifier: Arc<dyn IdentityVerifier>, config: GatewayConfig) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            verifier,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn verifier(&self) -> &Arc<dyn IdentityVerifier> {
        &self.verifier
    }

    /// Verify a handshake credential. Rejection creates no registry state.
    pub fn authenticate(&self, token: &str) -> std::result::Result<Identity, AuthError> {
        self.verifier.verify(token).inspect_err(|e| {
            warn!("Push handshake rejected: {}", e);
        })
    }

    /// Register an authenticated connection and queue its `connected` acknowledgement.
    pub fn connect(&self, identity: &Identity) -> (Arc<ConnectionHandle>, EventReceiver) {
        let (handle, receiver) = self.registry.register(identity);
        handle.send(ServerEvent::connected(&handle.user_id, Utc::now()));
        info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            "{} connected ({} connections for user)",
            handle.username,
            self.registry.user_connection_count(&handle.user_id)
        );
        (handle, receiver)
    }

    /// Drop a connection. Safe to call more than once.
    pub fn disconnect(&self, id: ConnectionId) {
        if let Some(handle) = self.registry.unregister(id) {
            info!(
                connection_id = %id,
                user_id = %handle.user_id,
                "{} disconnected",
                handle.username
            );
        }
    }

    /// Handle one inbound text frame. Malformed frames are answered with an
    /// `error` event; the connection stays open.
    pub fn handle_client_message(&self, handle: &ConnectionHandle, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection_id = %handle.id, "Malformed client frame: {}", e);
                handle.send(ServerEvent::error(format!("Malformed message: {}", e)));
                return;
            }
        };

        match message {
            ClientMessage::JoinRoom(room) => match Room::named(room.as_str()) {
                Ok(room) => {
                    self.registry.join(handle.id, room.name());
                    debug!(connection_id = %handle.id, room = %room, "Joined room");
                    handle.send(ServerEvent::joined_room(room.name()));
                }
                Err(e) => {
                    handle.send(ServerEvent::error(e.to_string()));
                }
            },
            ClientMessage::LeaveRoom(room) => match Room::named(room.as_str()) {
                Ok(room) => {
                    self.registry.leave(handle.id, room.name());
                    debug!(connection_id = %handle.id, room = %room, "Left room");
                    handle.send(ServerEvent::left_room(room.name()));
                }
                Err(e) => {
                    handle.send(ServerEvent::error(e.to_string()));
                }
            },
        }
    }

    /// Push `payload` as `new_notification` to every connection of a user.
    pub fn send_to_user(&self, user_id: &str, payload: Value) -> usize {
        self.emit_to_user(user_id, &ServerEvent::new_notification(payload))
    }

    pub fn emit_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let delivered = self.registry.send_to_user(user_id, event);
        debug!(user_id, event = %event.event, delivered, "Pushed to user");
        delivered
    }

    pub fn send_to_users<S: AsRef<str>>(&self, user_ids: &[S], payload: Value) -> usize {
        let event = ServerEvent::new_notification(payload);
        user_ids
            .iter()
            .map(|user_id| self.emit_to_user(user_id.as_ref(), &event))
            .sum()
    }

    /// Push `payload` as `new_announcement` to every connection.
    pub fn broadcast(&self, payload: Value) -> usize {
        self.emit_broadcast(&ServerEvent::new_announcement(payload))
    }

    pub fn emit_broadcast(&self, event: &ServerEvent) -> usize {
        let delivered = self.registry.broadcast(event);
        debug!(event = %event.event, delivered, "Broadcast");
        delivered
    }

    /// Emit `event` to everyone currently joined to a named room.
    pub fn send_to_room(&self, room: &str, event: &str, payload: Value) -> Result<usize> {
        let room = Room::named(room)?;
        let delivered = self
            .registry
            .send_to_room(&room, &ServerEvent::new(event, payload));
        debug!(room = %room, event, delivered, "Pushed to room");
        Ok(delivered)
    }

    /// Terminate every session of a user.
    pub fn disconnect_user(&self, user_id: &str) -> usize {
        let closed = self.registry.disconnect_user(user_id);
        if closed > 0 {
            info!(user_id, "Force-closed {} connections", closed);
        }
        closed
    }

    /// Announce maintenance to everyone. With `disconnect_after`, all
    /// connections are closed once the grace delay has passed.
    pub fn broadcast_maintenance(&self, message: &str, disconnect_after: bool) -> usize {
        let event = ServerEvent::system_maintenance(message, Utc::now(), disconnect_after);
        let notified = self.registry.broadcast(&event);
        info!(
            "Maintenance notice sent to {} connections (disconnect_after: {})",
            notified, disconnect_after
        );

        if disconnect_after {
            let registry = Arc::clone(&self.registry);
            let grace = self.config.maintenance_grace();
            tokio::spawn(async move {
                sleep(grace).await;
                let closed = registry.disconnect_all();
                info!("Maintenance: closed {} connections", closed);
            });
        }

        notified
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.registry.is_user_online(user_id)
    }

    pub fn online_user_ids(&self) -> Vec<String> {
        self.registry.online_user_ids()
    }

    pub fn online_user_count(&self) -> usize {
        self.registry.online_user_count()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.registry.user_connection_count(user_id)
    }
}
