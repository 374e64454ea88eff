//! Retry helpers for database writes.

use std::future::Future;
use std::time::Duration;

use crate::{Error, Result};

const MAX_BUSY_RETRIES: u32 = 8;
const BASE_DELAY: Duration = Duration::from_millis(10);
const MAX_DELAY: Duration = Duration::from_secs(1);

fn mentions_lock(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), by code or by message.
fn is_lock_contention(err: &Error) -> bool {
    match err {
        Error::DatabaseSqlx(sqlx::Error::Database(db_err)) => {
            matches!(db_err.code().as_deref(), Some("5" | "6")) || mentions_lock(db_err.message())
        }
        Error::DatabaseSqlx(other) => mentions_lock(&other.to_string()),
        _ => false,
    }
}

/// Doubling delay with up to 25% jitter, never above [`MAX_DELAY`].
fn backoff(attempt: u32) -> Duration {
    let base = BASE_DELAY
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(MAX_DELAY);
    let jitter = base.mul_f64(rand::random::<f64>() * 0.25);
    (base + jitter).min(MAX_DELAY)
}

/// Run `op`, retrying while SQLite reports the database as busy or locked.
/// Any other error is returned immediately.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_BUSY_RETRIES && is_lock_contention(&err) => err,
            Err(err) => return Err(err),
        };

        let delay = backoff(attempt);
        attempt += 1;
        tracing::debug!(op = op_name, attempt, ?delay, error = %err, "Database busy, retrying");
        tokio::time::sleep(delay).await;
    }
}
