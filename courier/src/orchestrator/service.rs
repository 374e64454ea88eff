use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::database::models::{NotificationDbModel, NotificationKind, Priority, TemplateData};
use crate::database::repositories::{NotificationRepository, UserDirectory};
use crate::dispatcher::{Dispatcher, EnqueueRequest};
use crate::gateway::PushGateway;
use crate::{Error, Result};

/// Mail template used per notification kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub message_template: String,
    pub announcement_template: String,
    pub system_template: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            message_template: "notification_message".to_string(),
            announcement_template: "notification_announcement".to_string(),
            system_template: "notification_system".to_string(),
        }
    }
}

impl OrchestratorConfig {
    pub fn template_for(&self, kind: NotificationKind) -> &str {
        match kind {
            NotificationKind::Message => &self.message_template,
            NotificationKind::Announcement => &self.announcement_template,
            NotificationKind::System => &self.system_template,
        }
    }
}

/// Content of a notification to deliver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl NewNotification {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>, sender_name: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self.sender_name = Some(sender_name.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::validation("Notification title is required"));
        }
        if self.content.trim().is_empty() {
            return Err(Error::validation("Notification content is required"));
        }
        Ok(())
    }

    fn requires_mail(&self) -> bool {
        self.priority.is_some_and(Priority::is_elevated)
    }
}

/// What happened on the mail side of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MailFallback {
    /// Priority below high, or a broadcast announcement.
    NotRequired,
    Queued {
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// The user has no durable contact address.
    NoContactAddress,
    Failed { reason: String },
}

/// Outcome of one orchestrated delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub notification: NotificationDbModel,
    /// Connections the live push reached.
    pub live_connections: usize,
    pub mail: MailFallback,
}

/// A user a batch delivery could not reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFailure {
    pub user_id: String,
    pub reason: String,
}

/// Outcome of delivering one notification to several users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchDelivery {
    pub reports: Vec<DeliveryReport>,
    pub failures: Vec<DeliveryFailure>,
}

/// Single entry point that turns a domain event into delivery actions.
///
/// The notification record is always persisted first; live push and mail
/// fallback failures are logged and never undo it.
pub struct NotificationOrchestrator {
    notifications: Arc<dyn NotificationRepository>,
    directory: Arc<dyn UserDirectory>,
    gateway: Arc<PushGateway>,
    dispatcher: Arc<Dispatcher>,
    config: OrchestratorConfig,
}

impl NotificationOrchestrator {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        directory: Arc<dyn UserDirectory>,
        gateway: Arc<PushGateway>,
        dispatcher: Arc<Dispatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            notifications,
            directory,
            gateway,
            dispatcher,
            config,
        }
    }

    /// Deliver a `message` notification to one user.
    pub async fn notify_user(
        &self,
        user_id: &str,
        notification: &NewNotification,
    ) -> Result<DeliveryReport> {
        self.deliver_to_user(user_id, NotificationKind::Message, notification)
            .await
    }

    /// Deliver a `system` notification to one user.
    pub async fn system_alert(
        &self,
        user_id: &str,
        notification: &NewNotification,
    ) -> Result<DeliveryReport> {
        self.deliver_to_user(user_id, NotificationKind::System, notification)
            .await
    }

    /// [`notify_user`](Self::notify_user) for each user, in order. A user
    /// that cannot be reached is reported in `failures` and does not stop the
    /// rest of the batch.
    pub async fn notify_users<S: AsRef<str>>(
        &self,
        user_ids: &[S],
        notification: &NewNotification,
    ) -> Result<BatchDelivery> {
        self.deliver_to_users(user_ids, NotificationKind::Message, notification)
            .await
    }

    /// [`system_alert`](Self::system_alert) for each user, in order.
    pub async fn system_alert_users<S: AsRef<str>>(
        &self,
        user_ids: &[S],
        notification: &NewNotification,
    ) -> Result<BatchDelivery> {
        self.deliver_to_users(user_ids, NotificationKind::System, notification)
            .await
    }

    /// Persist a global announcement and broadcast it to every connection.
    /// Announcements never fan out mail.
    pub async fn announce(&self, notification: &NewNotification) -> Result<DeliveryReport> {
        notification.validate()?;

        let record = self.build_record(None, NotificationKind::Announcement, notification);
        self.notifications.create(&record).await?;

        let live_connections = self.gateway.broadcast(record.to_push_payload());
        info!(
            notification_id = %record.id,
            live_connections,
            "Announcement broadcast"
        );

        Ok(DeliveryReport {
            notification: record,
            live_connections,
            mail: MailFallback::NotRequired,
        })
    }

    /// Notifications addressed to `user_id`, newest first.
    pub async fn history(&self, user_id: &str, limit: u32) -> Result<Vec<NotificationDbModel>> {
        self.notifications.list_for_user(user_id, limit).await
    }

    fn build_record(
        &self,
        user_id: Option<&str>,
        kind: NotificationKind,
        notification: &NewNotification,
    ) -> NotificationDbModel {
        NotificationDbModel::new(
            user_id.map(str::to_string),
            kind,
            notification.title.trim(),
            notification.content.as_str(),
            notification.priority,
        )
        .with_sender(
            notification.sender_id.clone(),
            notification.sender_name.clone(),
        )
    }

    async fn deliver_to_users<S: AsRef<str>>(
        &self,
        user_ids: &[S],
        kind: NotificationKind,
        notification: &NewNotification,
    ) -> Result<BatchDelivery> {
        notification.validate()?;

        let mut batch = BatchDelivery {
            reports: Vec::with_capacity(user_ids.len()),
            failures: Vec::new(),
        };
        for user_id in user_ids.iter().map(AsRef::as_ref) {
            match self.deliver_to_user(user_id, kind, notification).await {
                Ok(report) => batch.reports.push(report),
                Err(e) => {
                    warn!(user_id, kind = %kind, "Notification delivery failed: {}", e);
                    batch.failures.push(DeliveryFailure {
                        user_id: user_id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(batch)
    }

    async fn deliver_to_user(
        &self,
        user_id: &str,
        kind: NotificationKind,
        notification: &NewNotification,
    ) -> Result<DeliveryReport> {
        if user_id.trim().is_empty() {
            return Err(Error::validation("Target user id is required"));
        }
        notification.validate()?;

        let record = self.build_record(Some(user_id), kind, notification);
        self.notifications.create(&record).await?;

        let live_connections = self.gateway.send_to_user(user_id, record.to_push_payload());

        let mail = if notification.requires_mail() {
            self.queue_mail_copy(user_id, kind, &record).await
        } else {
            MailFallback::NotRequired
        };

        debug!(
            notification_id = %record.id,
            user_id,
            live_connections,
            mail = ?mail,
            "Notification delivered"
        );

        Ok(DeliveryReport {
            notification: record,
            live_connections,
            mail,
        })
    }

    async fn queue_mail_copy(
        &self,
        user_id: &str,
        kind: NotificationKind,
        record: &NotificationDbModel,
    ) -> MailFallback {
        let contact = match self.directory.find_contact(user_id).await {
            Ok(contact) => contact,
            Err(e) => {
                warn!(user_id, notification_id = %record.id, "Contact lookup failed: {}", e);
                return MailFallback::Failed {
                    reason: e.to_string(),
                };
            }
        };

        let Some((address, display_name)) = contact
            .as_ref()
            .and_then(|c| c.email().map(|email| (email.to_string(), c.display_name.clone())))
        else {
            warn!(
                user_id,
                notification_id = %record.id,
                "No contact address for high-priority notification; mail copy skipped"
            );
            return MailFallback::NoContactAddress;
        };

        let priority = record.priority().unwrap_or_default();
        let mut data = TemplateData::new();
        data.insert("recipientName".to_string(), json!(display_name));
        data.insert("title".to_string(), json!(record.title));
        data.insert("content".to_string(), json!(record.content));
        data.insert(
            "senderName".to_string(),
            json!(record.sender_name.clone().unwrap_or_default()),
        );
        data.insert("priority".to_string(), json!(priority.to_string()));

        let request = EnqueueRequest::new(address, record.title.clone())
            .with_template(self.config.template_for(kind), data)
            .with_priority(priority);

        match self.dispatcher.enqueue(request).await {
            Ok(message_id) => {
                info!(
                    user_id,
                    notification_id = %record.id,
                    message_id = %message_id,
                    "Mail copy queued"
                );
                MailFallback::Queued { message_id }
            }
            Err(e) => {
                warn!(user_id, notification_id = %record.id, "Failed to queue mail copy: {}", e);
                MailFallback::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
