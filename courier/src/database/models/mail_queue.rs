//! Outbound mail queue models.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::Priority;
use crate::database::time::ms_to_datetime;
use crate::{Error, Result};

/// Key/value substitutions for a templated message.
pub type TemplateData = BTreeMap<String, serde_json::Value>;

/// Lifecycle of a queued message.
///
/// `pending -> processing -> sent`, or back to `pending` with a later
/// `scheduled_at` after a failed attempt, until retries run out and the
/// message lands in `failed`.
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
pub enum MessageStatus {
    Pending,
    Processing,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// A row of the `mail_queue` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MailQueueDbModel {
    pub id: String,
    pub recipient: String,
    pub subject: String,
    /// Rendered HTML body, when the message is not templated.
    pub content: Option<String>,
    pub template_id: Option<String>,
    /// JSON object of template substitutions.
    pub template_data: Option<String>,
    /// Priority rank (see [`Priority::rank`]).
    pub priority: i64,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    /// Earliest dispatch time, epoch ms.
    pub scheduled_at: i64,
    pub sent_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MailQueueDbModel {
    pub fn status(&self) -> Result<MessageStatus> {
        MessageStatus::from_str(&self.status)
            .map_err(|_| Error::Database(format!("Unknown mail status '{}'", self.status)))
    }

    pub fn priority(&self) -> Priority {
        Priority::from_rank(self.priority).unwrap_or_default()
    }

    pub fn scheduled_at(&self) -> DateTime<Utc> {
        ms_to_datetime(self.scheduled_at)
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        self.sent_at.map(ms_to_datetime)
    }

    pub fn template_data(&self) -> Result<TemplateData> {
        match self.template_data.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(raw)?),
            _ => Ok(TemplateData::new()),
        }
    }
}

/// Message counts grouped by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
}

impl QueueStats {
    /// Fold `(status, count)` rows into totals. Unknown statuses only count toward `total`.
    pub fn from_counts<'a>(rows: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        let mut stats = Self::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match MessageStatus::from_str(status) {
                Ok(MessageStatus::Pending) => stats.pending += count,
                Ok(MessageStatus::Processing) => stats.processing += count,
                Ok(MessageStatus::Sent) => stats.sent += count,
                Ok(MessageStatus::Failed) => stats.failed += count,
                Err(_) => {}
            }
            stats.total += count;
        }
        stats
    }
}
