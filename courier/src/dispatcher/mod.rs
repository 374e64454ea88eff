//! Mail queue dispatcher.
//!
//! A timer-driven worker that selects a bounded batch of due messages in
//! priority order, attempts delivery through a [`MailTransport`](crate::mail::MailTransport)
//! and moves each message through its state machine:
//!
//! ```text
//! pending -> processing -> sent
//!                       -> pending (retry, backed off)
//!                       -> failed  (retries exhausted)
//! ```

mod service;
pub mod state;

pub use service::{CycleReport, Dispatcher, DispatcherConfig, EnqueueRequest};
pub use state::{DeliveryOutcome, Transition, backoff_delay, next_transition};
