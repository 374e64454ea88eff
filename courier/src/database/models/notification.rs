//! Notification record models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Priority;
use crate::database::time::{datetime_to_ms, ms_to_datetime};

/// What kind of user-facing event a notification represents.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NotificationKind {
    Message,
    Announcement,
    System,
}

/// Notification record database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotificationDbModel {
    pub id: String,
    /// Target user; `None` for global announcements.
    pub user_id: Option<String>,
    pub notification_type: String,
    pub title: String,
    pub content: String,
    /// Priority rank, when one was given.
    pub priority: Option<i64>,
    pub sender_id: Option<String>,
    pub sender_name: Option<String>,
    pub is_read: bool,
    pub created_at: i64,
}

impl NotificationDbModel {
    pub fn new(
        user_id: Option<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        content: impl Into<String>,
        priority: Option<Priority>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            notification_type: kind.to_string(),
            title: title.into(),
            content: content.into(),
            priority: priority.map(Priority::rank),
            sender_id: None,
            sender_name: None,
            is_read: false,
            created_at: datetime_to_ms(Utc::now()),
        }
    }

    pub fn with_sender(mut self, sender_id: Option<String>, sender_name: Option<String>) -> Self {
        self.sender_id = sender_id;
        self.sender_name = sender_name;
        self
    }

    pub fn kind(&self) -> Option<NotificationKind> {
        self.notification_type.parse().ok()
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority.and_then(Priority::from_rank)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.created_at)
    }

    /// JSON payload pushed to clients for this record.
    pub fn to_push_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": self.notification_type,
            "title": self.title,
            "content": self.content,
            "priority": self.priority(),
            "senderId": self.sender_id,
            "senderName": self.sender_name,
            "createdAt": self.created_at().to_rfc3339(),
            "isRead": self.is_read,
        })
    }
}
