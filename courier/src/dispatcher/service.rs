//! The queue dispatcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::state::{DeliveryOutcome, Transition, next_transition};
use crate::database::models::{
    MailQueueDbModel, MessageStatus, Priority, QueueStats, TemplateData,
};
use crate::database::repositories::{MailQueueRepository, TemplateRepository};
use crate::database::time::{datetime_to_ms, days_before_ms};
use crate::mail::{MailTransport, resolve_content};
use crate::{Error, Result};

/// Dispatcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Period of the recurring cycle.
    pub interval_secs: u64,
    /// Maximum messages attempted per cycle.
    pub batch_size: u32,
    /// Backoff after the k-th failure is `backoff_base_minutes * 2^k` minutes.
    pub backoff_base_minutes: u64,
    /// Delay of the extra cycle scheduled after a high/urgent enqueue.
    pub urgent_delay_ms: u64,
    /// `max_retries` for messages that do not set one.
    pub default_max_retries: i32,
    /// A row left in `processing` longer than this is released back to
    /// `pending` by the next cycle.
    pub processing_lease_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            batch_size: 10,
            backoff_base_minutes: 5,
            urgent_delay_ms: 1000,
            default_max_retries: 3,
            processing_lease_secs: 600,
        }
    }
}

/// A message to put on the queue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub template_data: Option<TemplateData>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

impl EnqueueRequest {
    pub fn new(to: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            ..Default::default()
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_template(mut self, template_id: impl Into<String>, data: TemplateData) -> Self {
        self.template_id = Some(template_id.into());
        self.template_data = Some(data);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.to.trim().is_empty() {
            return Err(Error::validation("Recipient address is required"));
        }
        let has_template = self
            .template_id
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty());
        if self.content.is_none() && !has_template {
            return Err(Error::validation(
                "Either content or a template reference is required",
            ));
        }
        if !has_template && self.subject.trim().is_empty() {
            return Err(Error::validation("Subject is required"));
        }
        if self.max_retries.is_some_and(|m| m < 1) {
            return Err(Error::validation("maxRetries must be at least 1"));
        }
        Ok(())
    }
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Due messages selected for this cycle.
    pub selected: usize,
    pub sent: usize,
    /// Attempts that failed and were rescheduled.
    pub retried: usize,
    /// Attempts that exhausted their retries.
    pub failed: usize,
    /// The cycle did not run because another one was in flight.
    pub skipped: bool,
}

impl CycleReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Resets the running flag when a cycle ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the durable mail queue.
///
/// At most one cycle runs at a time per instance. Within a cycle, messages are
/// attempted one after another in priority-then-schedule order.
pub struct Dispatcher {
    repo: Arc<dyn MailQueueRepository>,
    templates: Arc<dyn TemplateRepository>,
    transport: Arc<dyn MailTransport>,
    config: DispatcherConfig,
    running: AtomicBool,
    cancellation_token: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        repo: Arc<dyn MailQueueRepository>,
        templates: Arc<dyn TemplateRepository>,
        transport: Arc<dyn MailTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            repo,
            templates,
            transport,
            config,
            running: AtomicBool::new(false),
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Whether a cycle is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Put a message on the queue and return its id.
    ///
    /// High and urgent messages also schedule an extra cycle shortly after
    /// insertion.
    pub async fn enqueue(self: &Arc<Self>, request: EnqueueRequest) -> Result<String> {
        request.validate()?;

        let now = Utc::now();
        let priority = request.priority.unwrap_or_default();
        let template_data = request
            .template_data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let message = MailQueueDbModel {
            id: Uuid::new_v4().to_string(),
            recipient: request.to.trim().to_string(),
            subject: request.subject,
            content: request.content,
            template_id: request.template_id.filter(|t| !t.trim().is_empty()),
            template_data,
            priority: priority.rank(),
            status: MessageStatus::Pending.to_string(),
            retry_count: 0,
            max_retries: request
                .max_retries
                .unwrap_or(self.config.default_max_retries),
            last_error: None,
            scheduled_at: datetime_to_ms(request.scheduled_at.unwrap_or(now)),
            sent_at: None,
            created_at: datetime_to_ms(now),
            updated_at: datetime_to_ms(now),
        };

        self.repo.insert(&message).await?;
        info!(
            message_id = %message.id,
            priority = %priority,
            "Mail queued for {}",
            message.recipient
        );

        if priority.is_elevated() {
            self.schedule_trigger(Duration::from_millis(self.config.urgent_delay_ms));
        }

        Ok(message.id)
    }

    fn schedule_trigger(self: &Arc<Self>, delay: Duration) {
        let dispatcher = Arc::clone(self);
        let cancellation_token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancellation_token.cancelled() => return,
                _ = sleep(delay) => {}
            }

            if let Err(e) = dispatcher.process_queue().await {
                warn!("Out-of-band dispatch cycle failed: {}", e);
            }
        });
    }

    /// Spawn the periodic loop. Rows left in `processing` by a previous run
    /// are released back to `pending` first.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let cancellation_token = self.cancellation_token.clone();
        let period = Duration::from_secs(self.config.interval_secs.max(1));

        info!(
            "Starting mail dispatcher (interval {:?}, batch {})",
            period, self.config.batch_size
        );

        tokio::spawn(async move {
            match dispatcher
                .repo
                .release_processing(i64::MAX, datetime_to_ms(Utc::now()))
                .await
            {
                Ok(0) => {}
                Ok(released) => warn!("Released {} messages stuck in processing", released),
                Err(e) => error!("Failed to release stuck messages: {}", e),
            }

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        info!("Mail dispatcher stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.process_queue().await {
                            error!("Dispatch cycle failed: {}", e);
                        }
                    }
                }
            }
        })
    }

    /// Stop the periodic loop and any pending out-of-band triggers.
    pub fn stop(&self) {
        self.cancellation_token.cancel();
    }

    /// Run a cycle now.
    pub async fn trigger(&self) -> Result<CycleReport> {
        self.process_queue().await
    }

    pub async fn process_queue(&self) -> Result<CycleReport> {
        self.process_queue_at(Utc::now()).await
    }

    /// Run one cycle as of `now`.
    ///
    /// Returns a skipped report without touching the queue if another cycle
    /// is in flight.
    pub async fn process_queue_at(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Dispatch cycle already in flight, skipping");
            return Ok(CycleReport::skipped());
        }
        let _guard = RunningGuard(&self.running);

        let now_ms = datetime_to_ms(now);
        self.release_expired_claims(now).await;
        let due = self.repo.fetch_due(now_ms, self.config.batch_size).await?;

        let mut report = CycleReport {
            selected: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        debug!("Dispatching {} due messages", due.len());

        for message in &due {
            match self.attempt(message, now).await {
                Ok(Some(Transition::Sent { .. })) => report.sent += 1,
                Ok(Some(Transition::Retry { .. })) => report.retried += 1,
                Ok(Some(Transition::Failed { .. })) => report.failed += 1,
                Ok(None) => {}
                Err(e) => {
                    error!(message_id = %message.id, "Failed to update queued message: {}", e);
                }
            }
        }

        info!(
            selected = report.selected,
            sent = report.sent,
            retried = report.retried,
            failed = report.failed,
            "Dispatch cycle finished"
        );

        Ok(report)
    }

    /// Release rows whose claim outlived the processing lease.
    async fn release_expired_claims(&self, now: DateTime<Utc>) {
        let lease_ms = i64::try_from(self.config.processing_lease_secs.saturating_mul(1000))
            .unwrap_or(i64::MAX);
        let now_ms = datetime_to_ms(now);

        match self
            .repo
            .release_processing(now_ms.saturating_sub(lease_ms), now_ms)
            .await
        {
            Ok(0) => {}
            Ok(released) => warn!("Released {} messages with an expired claim", released),
            Err(e) => warn!("Failed to release expired claims: {}", e),
        }
    }

    /// Claim, deliver and record one message. `None` if the row was claimed elsewhere.
    async fn attempt(
        &self,
        message: &MailQueueDbModel,
        now: DateTime<Utc>,
    ) -> Result<Option<Transition>> {
        if !self.repo.claim(&message.id, datetime_to_ms(now)).await? {
            debug!(message_id = %message.id, "Message no longer pending, skipping");
            return Ok(None);
        }

        let outcome = self.deliver(message).await;
        let transition = next_transition(
            message.retry_count,
            message.max_retries,
            outcome,
            now,
            self.config.backoff_base_minutes,
        );

        let store_error = match self.record(message, &transition, now).await {
            Ok(true) => return Ok(Some(transition)),
            Ok(false) => {
                warn!(
                    message_id = %message.id,
                    "Message left processing before its outcome was recorded"
                );
                return Ok(None);
            }
            Err(e) => e,
        };

        // Hand the row back as a failed attempt so it is not stranded in
        // `processing`.
        warn!(
            message_id = %message.id,
            "Failed to record delivery outcome, releasing message: {}",
            store_error
        );
        let fallback = next_transition(
            message.retry_count,
            message.max_retries,
            DeliveryOutcome::Failed {
                reason: format!("Failed to record delivery outcome: {}", store_error),
            },
            now,
            self.config.backoff_base_minutes,
        );
        if self.record(message, &fallback, now).await? {
            Ok(Some(fallback))
        } else {
            Ok(None)
        }
    }

    /// Apply `transition` to a claimed row. `false` if the row was no longer
    /// `processing`.
    async fn record(
        &self,
        message: &MailQueueDbModel,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_ms = datetime_to_ms(now);

        match transition {
            Transition::Sent { sent_at } => {
                let applied = self
                    .repo
                    .mark_sent(&message.id, datetime_to_ms(*sent_at))
                    .await?;
                if applied {
                    info!(message_id = %message.id, "Mail sent to {}", message.recipient);
                }
                Ok(applied)
            }
            Transition::Retry {
                retry_count,
                scheduled_at,
                error,
            } => {
                let applied = self
                    .repo
                    .reschedule(
                        &message.id,
                        *retry_count,
                        error,
                        datetime_to_ms(*scheduled_at),
                        now_ms,
                    )
                    .await?;
                if applied {
                    warn!(
                        message_id = %message.id,
                        retry_count,
                        "Mail delivery failed, retrying at {}: {}",
                        scheduled_at.to_rfc3339(),
                        error
                    );
                }
                Ok(applied)
            }
            Transition::Failed { retry_count, error } => {
                let applied = self
                    .repo
                    .mark_failed(&message.id, *retry_count, error, now_ms)
                    .await?;
                if applied {
                    error!(
                        message_id = %message.id,
                        retry_count,
                        "Mail delivery failed permanently: {}",
                        error
                    );
                }
                Ok(applied)
            }
        }
    }

    async fn deliver(&self, message: &MailQueueDbModel) -> DeliveryOutcome {
        let (subject, body) = match self.render(message).await {
            Ok(rendered) => rendered,
            Err(e) => {
                return DeliveryOutcome::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match self
            .transport
            .send(&message.recipient, &subject, &body)
            .await
        {
            Ok(delivery_id) => DeliveryOutcome::Delivered { delivery_id },
            Err(e) => DeliveryOutcome::Failed {
                reason: e.to_string(),
            },
        }
    }

    async fn render(&self, message: &MailQueueDbModel) -> Result<(String, String)> {
        let Some(template_id) = message.template_id.as_deref() else {
            return Ok((
                message.subject.clone(),
                message.content.clone().unwrap_or_default(),
            ));
        };

        let template = self
            .templates
            .get_template(template_id)
            .await?
            .ok_or_else(|| Error::template(format!("Template '{}' not found", template_id)))?;
        let data = message.template_data()?;

        Ok(resolve_content(&template, &message.subject, &data))
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        self.repo.count_by_status().await
    }

    /// Move failed messages back to `pending`, due now. `None` resets all of them.
    pub async fn retry_failed(&self, ids: Option<&[String]>) -> Result<u64> {
        let count = self
            .repo
            .reset_failed(ids, datetime_to_ms(Utc::now()))
            .await?;
        info!("Reset {} failed messages to pending", count);
        Ok(count)
    }

    /// Delete sent messages older than `older_than_days`.
    pub async fn cleanup_sent(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = days_before_ms(Utc::now(), older_than_days);
        let count = self.repo.delete_sent_before(cutoff).await?;
        info!(
            "Cleaned up {} sent messages older than {} days",
            count, older_than_days
        );
        Ok(count)
    }

    pub async fn get_message(&self, id: &str) -> Result<MailQueueDbModel> {
        self.repo.get(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.interval_secs, 30);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.backoff_base_minutes, 5);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.processing_lease_secs, 600);
    }

    #[test]
    fn test_enqueue_validation() {
        assert!(EnqueueRequest::new("", "Hi").with_content("x").validate().is_err());
        assert!(EnqueueRequest::new("a@example.com", "Hi").validate().is_err());
        assert!(
            EnqueueRequest::new("a@example.com", "Hi")
                .with_content("x")
                .with_max_retries(0)
                .validate()
                .is_err()
        );
        assert!(
            EnqueueRequest::new("a@example.com", "")
                .with_template("welcome", TemplateData::new())
                .validate()
                .is_ok()
        );
        assert!(
            EnqueueRequest::new("a@example.com", "Hi")
                .with_content("x")
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_enqueue_request_wire_format() {
        let request: EnqueueRequest = serde_json::from_value(serde_json::json!({
            "to": "a@example.com",
            "subject": "Hi",
            "templateId": "welcome",
            "templateData": {"name": "Ada"},
            "priority": "urgent",
            "maxRetries": 5
        }))
        .unwrap();
        assert_eq!(request.template_id.as_deref(), Some("welcome"));
        assert_eq!(request.priority, Some(Priority::Urgent));
        assert_eq!(request.max_retries, Some(5));
        assert!(request.content.is_none());
    }
}
