use std::future::Future;
use std::time::Duration;

use tracing::warn;

use flowdeck_core::config::RetryConfig;
use flowdeck_core::error::Result;

/// Exponential backoff capped at `max_backoff_ms`, with 0.8x to 1.2x jitter.
pub fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}

/// Run `op` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. Only use this for requests that are safe to repeat.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_retries = config.max_retries;
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let backoff = calculate_backoff(attempt, config);
                warn!(
                    request = what,
                    attempt = attempt + 1,
                    max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Retrying backend request"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
