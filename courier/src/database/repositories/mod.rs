//! Repository layer.
//!
//! Each repository is a trait with a sqlx implementation, so services can be
//! wired against SQLite in production and against fakes in tests.

pub mod mail_queue;
pub mod notification;
pub mod template;
pub mod user;

pub use mail_queue::{MailQueueRepository, SqlxMailQueueRepository};
pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use template::{SqlxTemplateRepository, TemplateRepository};
pub use user::{SqlxUserDirectory, UserDirectory};
