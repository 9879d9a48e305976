//! Bounded retry with exponential backoff and jitter for downstream
//! HTTP calls — learner notifications, client notifications, leader
//! redirects, and membership registration all share this helper
//! instead of hand-rolling their own loop.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Retries `attempt` up to `max_retries` additional times (so
/// `max_retries + 1` attempts total) with a timeout that grows as
/// `base + retry * 0.5s` plus up to 200ms of jitter, matching the
/// backoff shape used throughout the prototype this protocol follows.
pub async fn with_backoff<F, Fut, T, E>(
    max_retries: u32,
    base_timeout: Duration,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut(Duration) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for retry in 0..=max_retries {
        let jitter_ms = rand::thread_rng().gen_range(0..200);
        let timeout = base_timeout + Duration::from_millis(retry as u64 * 500 + jitter_ms);
        match attempt(timeout).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if retry < max_retries {
                    tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(retry))).await;
                }
            }
        }
    }
    Err(last_err.expect("at least one attempt is always made"))
}

/// Backoff for leader-election retries: `min(base * 2^(count % 5), max) +
/// jitter * proposer_id`, the shape used to avoid split-vote livelock
/// among proposers racing to become leader.
pub fn election_backoff(
    base: Duration,
    max: Duration,
    election_count: u32,
    proposer_id: u64,
) -> Duration {
    let exp = 2u64.saturating_pow(election_count % 5);
    let scaled = base.saturating_mul(exp as u32).min(max);
    let jitter = Duration::from_millis((proposer_id % 50) * 10);
    scaled + jitter
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(3, Duration::from_millis(1), |_t| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = with_backoff(2, Duration::from_millis(1), |_t| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("boom") }
        })
        .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn election_backoff_caps_at_max() {
        let d = election_backoff(Duration::from_millis(1000), Duration::from_millis(5000), 10, 0);
        assert!(d <= Duration::from_millis(5000) + Duration::from_millis(0));
    }
}
