//! Bounded retry with exponential backoff for background deliveries.
//!
//! A delivery moves `Pending -> Sending -> {Delivered | Retrying | GivenUp}`;
//! `Retrying` goes back to `Sending` after the backoff delay. The final
//! state is returned to the caller for logging and metrics, never an error.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// State of one background delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Sending { attempt: u32 },
    Retrying { attempt: u32, delay: Duration },
    Delivered { attempts: u32 },
    GivenUp { attempts: u32 },
}

impl DeliveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeliveryState::Delivered { .. } | DeliveryState::GivenUp { .. }
        )
    }

    /// Metric label of a terminal state.
    pub fn outcome_label(&self) -> &'static str {
        match self {
            DeliveryState::Delivered { .. } => "delivered",
            DeliveryState::GivenUp { .. } => "given_up",
            DeliveryState::Pending
            | DeliveryState::Sending { .. }
            | DeliveryState::Retrying { .. } => "in_flight",
        }
    }
}

/// Attempt budget and backoff of a job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, first try included. Always at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubled after each further failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// One attempt, no retry.
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay after failed attempt number `attempt` (1-based): `base * 2^(attempt - 1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Run `attempt_fn` until it succeeds or the policy is exhausted.
///
/// `attempt_fn` receives the 1-based attempt number.
pub async fn run_with_retry<F, Fut, E>(
    policy: &RetryPolicy,
    job: &'static str,
    mut attempt_fn: F,
) -> DeliveryState
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut state = DeliveryState::Pending;
    debug!(target: "reg.task.retry", job, state = ?state, "Job queued for delivery");

    for attempt in 1..=policy.max_attempts {
        state = DeliveryState::Sending { attempt };
        debug!(target: "reg.task.retry", job, state = ?state, "Delivery attempt");

        match attempt_fn(attempt).await {
            Ok(()) => {
                state = DeliveryState::Delivered { attempts: attempt };
                debug!(target: "reg.task.retry", job, state = ?state, "Delivered");
                return state;
            }
            Err(e) if attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                state = DeliveryState::Retrying { attempt, delay };
                warn!(
                    target: "reg.task.retry",
                    job,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Delivery attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                state = DeliveryState::GivenUp { attempts: attempt };
                error!(
                    target: "reg.task.retry",
                    job,
                    attempts = attempt,
                    error = %e,
                    "Delivery failed, giving up"
                );
            }
        }
    }

    state
}
