//! Bounded retry with exponential backoff and jitter for transient model
//! and backend errors. Non-retryable errors surface immediately.

use std::time::Duration;

use orch_domain::config::RetryConfig;
use orch_domain::Result;

/// Delay before attempt `attempt` (1-based): base * 2^(attempt-1), plus up
/// to 25 % jitter, capped at `max_delay_ms`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config
        .base_delay_ms
        .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let capped = exp.min(config.max_delay_ms);
    // Cheap jitter: clock nanos, no RNG dependency.
    let jitter_span = capped / 4;
    let jitter = if jitter_span == 0 {
        0
    } else {
        (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0))
            % jitter_span
    };
    Duration::from_millis(capped + jitter)
}

/// Run `op` up to `config.max_attempts` times, sleeping between attempts.
/// Only errors with `is_retryable()` are retried; the total sleep is
/// bounded by `max_attempts * max_delay_ms * 1.25`.
pub async fn with_retries<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
