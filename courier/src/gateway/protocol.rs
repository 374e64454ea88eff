//! Push wire protocol.
//!
//! Every frame is a JSON text message of the form `{"event": <name>, "data": <payload>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_JOINED_ROOM: &str = "joined_room";
pub const EVENT_LEFT_ROOM: &str = "left_room";
pub const EVENT_NEW_NOTIFICATION: &str = "new_notification";
pub const EVENT_NEW_ANNOUNCEMENT: &str = "new_announcement";
pub const EVENT_SYSTEM_MAINTENANCE: &str = "system_maintenance";
pub const EVENT_ERROR: &str = "error";

/// Room argument of a join/leave request, either `"name"` or `{"room": "name"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RoomRef {
    Name(String),
    Object { room: String },
}

impl RoomRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name(name) | Self::Object { room: name } => name,
        }
    }
}

/// Control messages a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinRoom(RoomRef),
    LeaveRoom(RoomRef),
}

impl ClientMessage {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// An outbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn connected(user_id: &str, at: DateTime<Utc>) -> Self {
        Self::new(
            EVENT_CONNECTED,
            json!({ "userId": user_id, "timestamp": at.to_rfc3339() }),
        )
    }

    pub fn joined_room(room: &str) -> Self {
        Self::new(EVENT_JOINED_ROOM, json!({ "room": room }))
    }

    pub fn left_room(room: &str) -> Self {
        Self::new(EVENT_LEFT_ROOM, json!({ "room": room }))
    }

    pub fn new_notification(payload: Value) -> Self {
        Self::new(EVENT_NEW_NOTIFICATION, payload)
    }

    pub fn new_announcement(payload: Value) -> Self {
        Self::new(EVENT_NEW_ANNOUNCEMENT, payload)
    }

    pub fn system_maintenance(message: &str, at: DateTime<Utc>, disconnect_after: bool) -> Self {
        Self::new(
            EVENT_SYSTEM_MAINTENANCE,
            json!({
                "message": message,
                "timestamp": at.to_rfc3339(),
                "disconnectAfter": disconnect_after,
            }),
        )
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EVENT_ERROR, json!({ "message": message.into() }))
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
