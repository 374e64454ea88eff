//! Crate error type.

use thiserror::Error;

use crate::gateway::auth::AuthError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Storage
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("{entity_type} '{id}' not found")]
    NotFound { entity_type: String, id: String },

    // Caller input
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    #[error("Unauthenticated: {0}")]
    Auth(#[from] AuthError),

    // Delivery
    #[error("Mail delivery failed: {0}")]
    Transport(String),
    #[error("Cannot render template: {0}")]
    Template(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport(reason.into())
    }

    pub fn template(reason: impl Into<String>) -> Self {
        Self::Template(reason.into())
    }
}
