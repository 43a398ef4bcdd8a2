//! Retry Controller
//!
//! Wraps one step attempt (resolve + act) and re-invokes it on transient
//! failures. The operation receives the 1-based attempt number and must
//! re-resolve its element every time; handles from an earlier attempt are
//! never reused.
//!
//! ```text
//! attempt 1 ──► Success ─────────────────────────────► done
//!     │
//!     ├──► transient (NotVisible/Detached/Timeout) ──► sleep(backoff(1)) ──► attempt 2 ...
//!     │
//!     └──► permanent ────────────────────────────────► done (no retry)
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::duration_ms;
use crate::outcome::AttemptOutcome;

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay after every failure
    Fixed {
        /// Delay between attempts
        #[serde(rename = "delay_ms", with = "duration_ms")]
        delay: Duration,
    },
    /// Doubling delay, capped
    Exponential {
        /// Delay after the first failure
        #[serde(rename = "base_ms", with = "duration_ms")]
        base: Duration,
        /// Upper bound for any delay
        #[serde(rename = "cap_ms", with = "duration_ms")]
        cap: Duration,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(4),
        }
    }
}

impl Backoff {
    /// Fixed backoff
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Delay to wait after failed attempt `attempt` (1-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay } => delay,
            Self::Exponential { base, cap } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.checked_mul(factor).map_or(cap, |d| d.min(cap))
            }
        }
    }
}

/// Attempt budget and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay schedule, written `backoff: { exponential: { base_ms, cap_ms } }`
    #[serde(with = "serde_yaml_ng::with::singleton_map")]
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Single attempt, no retry
    #[must_use]
    pub const fn once() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    /// Set the attempt budget
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Terminal outcome of a retried operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryReport {
    /// Outcome of the last attempt
    pub outcome: AttemptOutcome,
    /// Number of times the operation was invoked
    pub attempts: u32,
}

impl RetryReport {
    /// Attempts beyond the first
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Retry controller
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    /// Create a controller for a policy
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Current policy
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// A budget of zero is treated as one attempt.
    pub async fn run<F, Fut>(&self, mut op: F) -> RetryReport
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptOutcome>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = op(attempt).await;
            let AttemptOutcome::Failure(failure) = &outcome else {
                return RetryReport {
                    outcome,
                    attempts: attempt,
                };
            };

            if !failure.kind.is_transient() {
                return RetryReport {
                    outcome,
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                warn!(
                    attempts = attempt,
                    kind = %failure.kind,
                    message = %failure.message,
                    "retry budget exhausted"
                );
                return RetryReport {
                    outcome,
                    attempts: attempt,
                };
            }

            let delay = self.policy.backoff.delay(attempt);
            debug!(
                attempt,
                max_attempts,
                kind = %failure.kind,
                delay_ms = delay.as_millis() as u64,
                "transient failure, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}
