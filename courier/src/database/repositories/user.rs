//! User directory: contact lookup for mail fallback.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::UserContactDbModel;
use crate::database::retry::retry_on_sqlite_busy;

/// Resolves a user id to its durable contact details.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_contact(&self, user_id: &str) -> Result<Option<UserContactDbModel>>;
    async fn upsert_contact(&self, contact: &UserContactDbModel) -> Result<()>;
}

/// SQLx implementation of UserDirectory.
pub struct SqlxUserDirectory {
    pool: SqlitePool,
}

impl SqlxUserDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for SqlxUserDirectory {
    async fn find_contact(&self, user_id: &str) -> Result<Option<UserContactDbModel>> {
        let contact =
            sqlx::query_as::<_, UserContactDbModel>("SELECT * FROM user_contact WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(contact)
    }

    async fn upsert_contact(&self, contact: &UserContactDbModel) -> Result<()> {
        retry_on_sqlite_busy("user_contact.upsert", || async {
            sqlx::query(
                r#"
                INSERT INTO user_contact (user_id, display_name, email)
                VALUES (?, ?, ?)
                ON CONFLICT(user_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    email = excluded.email
                "#,
            )
            .bind(&contact.user_id)
            .bind(&contact.display_name)
            .bind(&contact.email)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;

    #[tokio::test]
    async fn test_contact_lookup() {
        let repo = SqlxUserDirectory::new(test_pool().await);
        assert!(repo.find_contact("u1").await.unwrap().is_none());

        repo.upsert_contact(&UserContactDbModel {
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
            email: Some("  ".to_string()),
        })
        .await
        .unwrap();
        let contact = repo.find_contact("u1").await.unwrap().unwrap();
        assert_eq!(contact.email(), None);

        repo.upsert_contact(&UserContactDbModel {
            user_id: "u1".to_string(),
            display_name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
        })
        .await
        .unwrap();
        let contact = repo.find_contact("u1").await.unwrap().unwrap();
        assert_eq!(contact.email(), Some("ada@example.com"));
    }
}
