use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How long to wait after a run of consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySchedule {
    /// Same pause after every failure.
    Fixed(Duration),
    /// `floor`, doubling per consecutive failure, never above `cap`.
    Exponential { floor: Duration, cap: Duration },
}

/// Shared retry policy for command delivery (bounded, fixed pause) and
/// stream reconnects (unbounded, exponential capped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub schedule: DelaySchedule,
}

impl RetryPolicy {
    pub const fn bounded(max_attempts: u32, pause: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            schedule: DelaySchedule::Fixed(pause),
        }
    }

    pub const fn unbounded_exponential(floor: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: None,
            schedule: DelaySchedule::Exponential { floor, cap },
        }
    }

    /// Pause to take after `failures` consecutive failures (1-based).
    ///
    /// Pure function of the count so schedules can be checked without sleeping.
    pub fn delay_after(&self, failures: u32) -> Duration {
        match self.schedule {
            DelaySchedule::Fixed(pause) => pause,
            DelaySchedule::Exponential { floor, cap } => {
                let factor = 2u32.saturating_pow(failures.saturating_sub(1));
                floor.saturating_mul(factor).min(cap)
            }
        }
    }

    /// Whether another attempt may follow `attempt` (1-based).
    pub fn allows_after(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }

    fn max_label(&self) -> String {
        match self.max_attempts {
            Some(max) => max.to_string(),
            None => "∞".to_string(),
        }
    }
}

/// Terminal result of [`run`].
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    Exhausted { attempts: u32, last_error: anyhow::Error },
    Cancelled { attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Succeeded { attempts, .. }
            | RetryOutcome::Exhausted { attempts, .. }
            | RetryOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

/// Run `op` until it succeeds, the policy is exhausted, or `cancel` fires.
///
/// Each failure is logged with its attempt number. An attempt already in
/// flight is allowed to finish; cancellation is observed before each attempt
/// and during the pause between attempts.
pub async fn run<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled { attempts: attempt };
        }
        attempt += 1;

        let err = match op(attempt).await {
            Ok(value) => {
                return RetryOutcome::Succeeded {
                    value,
                    attempts: attempt,
                };
            }
            Err(e) => e,
        };

        warn!(
            "{label} failed (attempt {attempt}/{}): {err:#}",
            policy.max_label()
        );

        if !policy.allows_after(attempt) {
            return RetryOutcome::Exhausted {
                attempts: attempt,
                last_error: err,
            };
        }

        tokio::select! {
            _ = cancel.cancelled() => return RetryOutcome::Cancelled { attempts: attempt },
            _ = tokio::time::sleep(policy.delay_after(attempt)) => {}
        }
    }
}
