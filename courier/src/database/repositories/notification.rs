//! Notification record repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::NotificationDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::{Error, Result};

/// Persistent user-facing notification records.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, record: &NotificationDbModel) -> Result<()>;
    async fn get(&self, id: &str) -> Result<NotificationDbModel>;
    /// Records addressed to `user_id`, newest first.
    async fn list_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<NotificationDbModel>>;
}

/// SQLx implementation of NotificationRepository.
pub struct SqlxNotificationRepository {
    pool: SqlitePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, record: &NotificationDbModel) -> Result<()> {
        retry_on_sqlite_busy("notification.create", || async {
            sqlx::query(
                r#"
                INSERT INTO notification (
                    id, user_id, notification_type, title, content, priority,
                    sender_id, sender_name, is_read, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.user_id)
            .bind(&record.notification_type)
            .bind(&record.title)
            .bind(&record.content)
            .bind(record.priority)
            .bind(&record.sender_id)
            .bind(&record.sender_name)
            .bind(record.is_read)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<NotificationDbModel> {
        sqlx::query_as::<_, NotificationDbModel>("SELECT * FROM notification WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Notification", id))
    }

    async fn list_for_user(&self, user_id: &str, limit: u32) -> Result<Vec<NotificationDbModel>> {
        let rows = sqlx::query_as::<_, NotificationDbModel>(
            "SELECT * FROM notification WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
