//! Database models.

mod mail_queue;
mod notification;
mod priority;
mod template;
mod user;

pub use mail_queue::{MailQueueDbModel, MessageStatus, QueueStats, TemplateData};
pub use notification::{NotificationDbModel, NotificationKind};
pub use priority::Priority;
pub use template::EmailTemplateDbModel;
pub use user::UserContactDbModel;
