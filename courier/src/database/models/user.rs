use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Durable contact details of a user.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UserContactDbModel {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
}

impl UserContactDbModel {
    /// The usable email address, if any.
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}
