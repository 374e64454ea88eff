//! Notification orchestration.
//!
//! Turns a domain event into delivery actions: persist the record, always
//! push it live, and queue a mail copy for high and urgent events.

mod service;

pub use service::{
    BatchDelivery, DeliveryFailure, DeliveryReport, MailFallback, NewNotification,
    NotificationOrchestrator, OrchestratorConfig,
};
