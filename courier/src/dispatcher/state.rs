//! Per-message state machine.
//!
//! A delivery attempt yields a [`DeliveryOutcome`]; [`next_transition`] turns
//! it into the row update the dispatcher applies.

use chrono::{DateTime, Duration, Utc};

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { delivery_id: String },
    Failed { reason: String },
}

/// State change to apply to a `processing` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// `processing -> sent`.
    Sent { sent_at: DateTime<Utc> },
    /// `processing -> pending` with a backed-off schedule.
    Retry {
        retry_count: i32,
        scheduled_at: DateTime<Utc>,
        error: String,
    },
    /// `processing -> failed`, terminal.
    Failed { retry_count: i32, error: String },
}

/// Upper bound on a single backoff, roughly a century.
const MAX_BACKOFF_MINUTES: u64 = 100 * 365 * 24 * 60;

/// Delay before the next attempt after the `retry_count`-th failure:
/// `base_minutes * 2^retry_count` minutes.
pub fn backoff_delay(base_minutes: u64, retry_count: i32) -> Duration {
    let exponent = retry_count.clamp(0, 40) as u32;
    let minutes = base_minutes
        .saturating_mul(1u64 << exponent)
        .min(MAX_BACKOFF_MINUTES);
    Duration::minutes(minutes as i64)
}

/// Decide the next state of a message after an attempt at `now`.
pub fn next_transition(
    retry_count: i32,
    max_retries: i32,
    outcome: DeliveryOutcome,
    now: DateTime<Utc>,
    backoff_base_minutes: u64,
) -> Transition {
    match outcome {
        DeliveryOutcome::Delivered { .. } => Transition::Sent { sent_at: now },
        DeliveryOutcome::Failed { reason } => {
            let retry_count = retry_count.saturating_add(1);
            if retry_count >= max_retries {
                Transition::Failed {
                    retry_count,
                    error: reason,
                }
            } else {
                Transition::Retry {
                    retry_count,
                    scheduled_at: now
                        .checked_add_signed(backoff_delay(backoff_base_minutes, retry_count))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC),
                    error: reason,
                }
            }
        }
    }
}
