//! Generic retry policy applied uniformly over a per-protocol
//! single-attempt send closure.
//!
//! Promoted out of each forwarder per the Design Note in spec.md §9: the
//! Python source hid a `for attempt in range(retry_times + 1)` loop inside
//! every forwarder class. Here retry is a first-class value applied by one
//! wrapper; per-protocol code only implements a single attempt.

use std::time::{Duration, Instant};

use crate::{ForwardOutcome, ForwardResult, ForwardStatus};

#[derive(Debug, Clone, Copy)]
pub enum Backoff {
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Number of *additional* attempts after the first.
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy { retry_count: 0, retry_delay: Duration::ZERO, backoff: Backoff::Fixed }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.retry_delay,
            Backoff::Exponential => self.retry_delay.saturating_mul(1 << attempt.min(8)),
        }
    }
}

/// Drive `attempt_fn` (a single-attempt send) through `policy`'s retry
/// budget. `attempt_fn` returns `Ok(())` on success or a classified
/// [`ForwardOutcome`] on failure; non-transient failures short-circuit
/// without consuming the remaining retry budget.
pub async fn forward_with_retry<F, Fut>(policy: &RetryPolicy, mut attempt_fn: F) -> ForwardResult
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<(), ForwardOutcome>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;
    loop {
        match attempt_fn(attempt).await {
            Ok(()) => {
                return ForwardResult {
                    status: ForwardStatus::Success,
                    status_code: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retry_count: attempt,
                    error: None,
                };
            }
            Err(outcome) => {
                let transient = outcome.transient;
                if transient && attempt < policy.retry_count {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                    continue;
                }
                let status = if !transient {
                    ForwardStatus::Failed
                } else if matches!(outcome.status, Some(ForwardStatus::Timeout)) {
                    ForwardStatus::Timeout
                } else {
                    ForwardStatus::Failed
                };
                return ForwardResult {
                    status,
                    status_code: outcome.status_code,
                    duration_ms: start.elapsed().as_millis() as u64,
                    retry_count: attempt,
                    error: Some(outcome.error),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_budget() {
        let policy = RetryPolicy { retry_count: 3, retry_delay: Duration::from_millis(1), backoff: Backoff::Fixed };
        let calls = AtomicU32::new(0);
        let result = forward_with_retry(&policy, |attempt| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ForwardOutcome::transient(format!("attempt {attempt} failed")))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert_eq!(result.status, ForwardStatus::Success);
        assert_eq!(result.retry_count, 2);
    }

    #[tokio::test]
    async fn non_transient_failure_short_circuits() {
        let policy = RetryPolicy { retry_count: 5, retry_delay: Duration::from_millis(1), backoff: Backoff::Fixed };
        let calls = AtomicU32::new(0);
        let result = forward_with_retry(&policy, |_attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ForwardOutcome::permanent("bad request".to_string(), Some(400))) }
        })
        .await;
        assert_eq!(result.status, ForwardStatus::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_retry_budget_yields_failure() {
        let policy = RetryPolicy { retry_count: 2, retry_delay: Duration::from_millis(1), backoff: Backoff::Fixed };
        let result = forward_with_retry(&policy, |_attempt| async { Err(ForwardOutcome::transient("still down".to_string())) }).await;
        assert_eq!(result.status, ForwardStatus::Failed);
        assert_eq!(result.retry_count, 2);
    }
}
