//! Email template repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::EmailTemplateDbModel;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

/// Lookup of stored email templates.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn get_template(&self, id: &str) -> Result<Option<EmailTemplateDbModel>>;
    async fn upsert_template(&self, template: &EmailTemplateDbModel) -> Result<()>;
}

/// SQLx implementation of TemplateRepository.
pub struct SqlxTemplateRepository {
    pool: SqlitePool,
}

impl SqlxTemplateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for SqlxTemplateRepository {
    async fn get_template(&self, id: &str) -> Result<Option<EmailTemplateDbModel>> {
        let template =
            sqlx::query_as::<_, EmailTemplateDbModel>("SELECT * FROM email_template WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(template)
    }

    async fn upsert_template(&self, template: &EmailTemplateDbModel) -> Result<()> {
        let now = now_ms();
        retry_on_sqlite_busy("email_template.upsert", || async {
            sqlx::query(
                r#"
                INSERT INTO email_template (id, name, subject, body, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    subject = excluded.subject,
                    body = excluded.body,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&template.id)
            .bind(&template.name)
            .bind(&template.subject)
            .bind(&template.body)
            .bind(template.created_at)
            .bind(now)
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
    async fn test_upsert_then_get() {
        let repo = SqlxTemplateRepository::new(test_pool().await);
        assert!(repo.get_template("welcome").await.unwrap().is_none());

        let template = EmailTemplateDbModel::new(
            "welcome",
            "Welcome",
            Some("Hello {{name}}".to_string()),
            "<p>Hi {{name}}</p>",
        );
        repo.upsert_template(&template).await.unwrap();

        let mut updated = template.clone();
        updated.body = "<p>Welcome back {{name}}</p>".to_string();
        repo.upsert_template(&updated).await.unwrap();

        let loaded = repo.get_template("welcome").await.unwrap().unwrap();
        assert_eq!(loaded.body, "<p>Welcome back {{name}}</p>");
        assert_eq!(loaded.subject.as_deref(), Some("Hello {{name}}"));
    }

    #[tokio::test]
    async fn test_migrations_seed_notification_templates() {
        let repo = SqlxTemplateRepository::new(test_pool().await);
        for id in [
            "notification_message",
            "notification_announcement",
            "notification_system",
        ] {
            let template = repo.get_template(id).await.unwrap().unwrap();
            assert!(template.body.contains("{{content}}"));
            assert!(template.subject.is_some_and(|s| s.contains("{{title}}")));
        }
    }
}
