//! Mail queue repository.

use async_trait::async_trait;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{MailQueueDbModel, QueueStats};
use crate::database::retry::retry_on_sqlite_busy;
use crate::{Error, Result};

/// Durable store behind the dispatcher.
///
/// State transitions are conditional on the current status so that a row is
/// only ever moved by the cycle that claimed it.
#[async_trait]
pub trait MailQueueRepository: Send + Sync {
    async fn insert(&self, message: &MailQueueDbModel) -> Result<()>;
    async fn get(&self, id: &str) -> Result<MailQueueDbModel>;

    /// Pending messages with `scheduled_at <= now_ms`, highest priority first,
    /// then oldest schedule first.
    async fn fetch_due(&self, now_ms: i64, limit: u32) -> Result<Vec<MailQueueDbModel>>;

    /// `pending -> processing`. Returns `false` if the row was not pending.
    async fn claim(&self, id: &str, now_ms: i64) -> Result<bool>;
    /// `processing -> sent`. Returns `false` if the row was not processing.
    async fn mark_sent(&self, id: &str, sent_at_ms: i64) -> Result<bool>;
    /// `processing -> pending` with a new schedule after a failed attempt.
    async fn reschedule(
        &self,
        id: &str,
        retry_count: i32,
        last_error: &str,
        scheduled_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool>;
    /// `processing -> failed` once retries are exhausted.
    async fn mark_failed(
        &self,
        id: &str,
        retry_count: i32,
        last_error: &str,
        now_ms: i64,
    ) -> Result<bool>;
    /// Return rows claimed before `claimed_before_ms` and still `processing`
    /// to `pending`.
    async fn release_processing(&self, claimed_before_ms: i64, now_ms: i64) -> Result<u64>;

    async fn count_by_status(&self) -> Result<QueueStats>;
    /// `failed -> pending` for the given ids, or for every failed row when `ids` is `None`.
    async fn reset_failed(&self, ids: Option<&[String]>, now_ms: i64) -> Result<u64>;
    /// Delete `sent` rows whose `sent_at` is older than the cutoff.
    async fn delete_sent_before(&self, cutoff_ms: i64) -> Result<u64>;
}

/// SQLx implementation of MailQueueRepository.
pub struct SqlxMailQueueRepository {
    pool: SqlitePool,
}

impl SqlxMailQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailQueueRepository for SqlxMailQueueRepository {
    async fn insert(&self, message: &MailQueueDbModel) -> Result<()> {
        retry_on_sqlite_busy("mail_queue.insert", || async {
            sqlx::query(
                r#"
                INSERT INTO mail_queue (
                    id, recipient, subject, content, template_id, template_data,
                    priority, status, retry_count, max_retries, last_error,
                    scheduled_at, sent_at, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&message.id)
            .bind(&message.recipient)
            .bind(&message.subject)
            .bind(&message.content)
            .bind(&message.template_id)
            .bind(&message.template_data)
            .bind(message.priority)
            .bind(&message.status)
            .bind(message.retry_count)
            .bind(message.max_retries)
            .bind(&message.last_error)
            .bind(message.scheduled_at)
            .bind(message.sent_at)
            .bind(message.created_at)
            .bind(message.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<MailQueueDbModel> {
        sqlx::query_as::<_, MailQueueDbModel>("SELECT * FROM mail_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("MailQueueMessage", id))
    }

    async fn fetch_due(&self, now_ms: i64, limit: u32) -> Result<Vec<MailQueueDbModel>> {
        let rows = sqlx::query_as::<_, MailQueueDbModel>(
            r#"
            SELECT * FROM mail_queue
            WHERE status = 'pending' AND scheduled_at <= ?
            ORDER BY priority DESC, scheduled_at ASC
            LIMIT ?
            "#,
        )
        .bind(now_ms)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn claim(&self, id: &str, now_ms: i64) -> Result<bool> {
        retry_on_sqlite_busy("mail_queue.claim", || async {
            let result = sqlx::query(
                "UPDATE mail_queue SET status = 'processing', updated_at = ? WHERE id = ? AND status = 'pending'",
            )
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn mark_sent(&self, id: &str, sent_at_ms: i64) -> Result<bool> {
        retry_on_sqlite_busy("mail_queue.mark_sent", || async {
            let result = sqlx::query(
                r#"
                UPDATE mail_queue
                SET status = 'sent', sent_at = ?, last_error = NULL, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(sent_at_ms)
            .bind(sent_at_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn reschedule(
        &self,
        id: &str,
        retry_count: i32,
        last_error: &str,
        scheduled_at_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        retry_on_sqlite_busy("mail_queue.reschedule", || async {
            let result = sqlx::query(
                r#"
                UPDATE mail_queue
                SET status = 'pending', retry_count = ?, last_error = ?, scheduled_at = ?, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(retry_count)
            .bind(last_error)
            .bind(scheduled_at_ms)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: &str,
        retry_count: i32,
        last_error: &str,
        now_ms: i64,
    ) -> Result<bool> {
        retry_on_sqlite_busy("mail_queue.mark_failed", || async {
            let result = sqlx::query(
                r#"
                UPDATE mail_queue
                SET status = 'failed', retry_count = ?, last_error = ?, updated_at = ?
                WHERE id = ? AND status = 'processing'
                "#,
            )
            .bind(retry_count)
            .bind(last_error)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }

    async fn release_processing(&self, claimed_before_ms: i64, now_ms: i64) -> Result<u64> {
        retry_on_sqlite_busy("mail_queue.release_processing", || async {
            let result = sqlx::query(
                r#"
                UPDATE mail_queue SET status = 'pending', updated_at = ?
                WHERE status = 'processing' AND updated_at < ?
                "#,
            )
            .bind(now_ms)
            .bind(claimed_before_ms)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn count_by_status(&self) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM mail_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        Ok(QueueStats::from_counts(
            rows.iter().map(|(status, count)| (status.as_str(), *count)),
        ))
    }

    async fn reset_failed(&self, ids: Option<&[String]>, now_ms: i64) -> Result<u64> {
        if ids.is_some_and(|ids| ids.is_empty()) {
            return Ok(0);
        }

        retry_on_sqlite_busy("mail_queue.reset_failed", || async {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "UPDATE mail_queue SET status = 'pending', retry_count = 0, last_error = NULL, scheduled_at = ",
            );
            builder.push_bind(now_ms);
            builder.push(", updated_at = ");
            builder.push_bind(now_ms);
            builder.push(" WHERE status = 'failed'");

            if let Some(ids) = ids {
                builder.push(" AND id IN (");
                let mut separated = builder.separated(", ");
                for id in ids {
                    separated.push_bind(id.as_str());
                }
                separated.push_unseparated(")");
            }

            let result = builder.build().execute(&self.pool).await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn delete_sent_before(&self, cutoff_ms: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM mail_queue WHERE status = 'sent' AND sent_at < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
