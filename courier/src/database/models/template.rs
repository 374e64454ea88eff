use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Email template with `{{variable}}` placeholders in subject and body.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmailTemplateDbModel {
    pub id: String,
    pub name: String,
    /// Overrides the queued message's subject when set.
    pub subject: Option<String>,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl EmailTemplateDbModel {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        subject: Option<String>,
        body: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            name: name.into(),
            subject,
            body: body.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
