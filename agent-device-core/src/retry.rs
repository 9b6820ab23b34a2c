use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::deadline::Deadline;
use crate::error::DaemonError;

/// Exponential backoff with full jitter. `jitter` is the upper bound of the
/// uniform random factor applied to the exponential delay (`1.0` reproduces
/// the classic "full jitter" algorithm; a smaller value narrows the spread).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter: 1.0,
        }
    }
}

impl RetryPolicy {
    /// Deterministic (jitter-free) delay ceiling for attempt `attempt` (1-based).
    fn exponential_cap(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        let scaled = self.base_delay_ms.saturating_mul(1u64 << shift);
        scaled.min(self.max_delay_ms)
    }

    fn sample_delay(&self, attempt: u32) -> u64 {
        let cap = self.exponential_cap(attempt);
        if cap == 0 || self.jitter <= 0.0 {
            return 0;
        }
        let factor = rand::thread_rng().gen_range(0.0..=self.jitter);
        ((cap as f64) * factor) as u64
    }
}

/// Classified reason codes for retryable failures, used in retry telemetry
/// and surfaced in `COMMAND_FAILED` details on exhaustion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    IosBootTimeout,
    AndroidBootTimeout,
    AdbTransportUnavailable,
    AdbProbeTimeout,
    RunnerDesync,
    EmptySnapshot,
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum RetryEvent {
    #[serde(rename = "attempt_failed")]
    AttemptFailed {
        phase: String,
        attempt: u32,
        elapsed_ms: u64,
        remaining_ms: u64,
        reason: ReasonCode,
    },
    #[serde(rename = "retry_scheduled")]
    RetryScheduled {
        phase: String,
        attempt: u32,
        delay_ms: u64,
        elapsed_ms: u64,
        remaining_ms: u64,
    },
    #[serde(rename = "succeeded")]
    Succeeded {
        phase: String,
        attempt: u32,
        elapsed_ms: u64,
    },
    #[serde(rename = "gave_up")]
    GaveUp {
        phase: String,
        attempt: u32,
        elapsed_ms: u64,
        reason: ReasonCode,
    },
}

/// Runs `op` up to `policy.max_attempts` times, backing off between
/// attempts, and stops early once `deadline` expires. Non-transient errors
/// (per `DaemonError::transient`) are never retried. `classify` maps a
/// failed attempt to a `ReasonCode` for telemetry; `on_event` receives each
/// emitted `RetryEvent` (the dispatcher forwards these into diagnostics).
pub async fn retry_with_backoff<T, Fut>(
    phase: &str,
    policy: &RetryPolicy,
    deadline: &Deadline,
    mut classify: impl FnMut(&DaemonError) -> ReasonCode,
    mut on_event: impl FnMut(RetryEvent),
    mut op: impl FnMut(u32) -> Fut,
) -> Result<T, DaemonError>
where
    Fut: Future<Output = Result<T, DaemonError>>,
{
    let start = std::time::Instant::now();
    let mut attempt = 1u32;

    loop {
        let result = op(attempt).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(value) => {
                on_event(RetryEvent::Succeeded {
                    phase: phase.to_string(),
                    attempt,
                    elapsed_ms,
                });
                return Ok(value);
            }
            Err(err) => {
                let reason = classify(&err);
                on_event(RetryEvent::AttemptFailed {
                    phase: phase.to_string(),
                    attempt,
                    elapsed_ms,
                    remaining_ms: deadline.remaining_ms(),
                    reason: reason.clone(),
                });

                if !err.transient || attempt >= policy.max_attempts || deadline.is_expired() {
                    on_event(RetryEvent::GaveUp {
                        phase: phase.to_string(),
                        attempt,
                        elapsed_ms,
                        reason,
                    });
                    return Err(err);
                }

                let delay_ms = policy.sample_delay(attempt).min(deadline.remaining_ms());
                on_event(RetryEvent::RetryScheduled {
                    phase: phase.to_string(),
                    attempt,
                    delay_ms,
                    elapsed_ms,
                    remaining_ms: deadline.remaining_ms(),
                });
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_succeeds() {
        let policy = RetryPolicy::default();
        let deadline = Deadline::after(StdDuration::from_secs(5));
        let mut events = Vec::new();

        let result: Result<i32, DaemonError> = retry_with_backoff(
            "test",
            &policy,
            &deadline,
            |_| ReasonCode::Other("n/a".to_string()),
            |e| events.push(e),
            |_attempt| async { Ok(42) },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RetryEvent::Succeeded { .. }));
    }

    #[tokio::test]
    async fn retries_transient_failures_until_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: 1.0,
        };
        let deadline = Deadline::after(StdDuration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));
        let mut events = Vec::new();

        let calls_clone = calls.clone();
        let result: Result<i32, DaemonError> = retry_with_backoff(
            "boot",
            &policy,
            &deadline,
            |_| ReasonCode::AndroidBootTimeout,
            |e| events.push(e),
            move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(DaemonError::command_failed("boot timed out", true)) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(events.last().unwrap(), RetryEvent::GaveUp { .. }));
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let policy = RetryPolicy::default();
        let deadline = Deadline::after(StdDuration::from_secs(5));
        let calls = Arc::new(AtomicU32::new(0));

        let calls_clone = calls.clone();
        let result: Result<i32, DaemonError> = retry_with_backoff(
            "open",
            &policy,
            &deadline,
            |_| ReasonCode::Other("permission".to_string()),
            |_| {},
            move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(DaemonError::command_failed("permission denied", false)) }
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
