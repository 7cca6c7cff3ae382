//! Bounded exponential backoff
//!
//! Used only around connection establishment (store, adapter gateways),
//! never around per-item processing: failed items resolve to outcomes and
//! transient cycle errors are retried on the next scheduled tick.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

const INITIAL_DELAY_SECS: u64 = 1;
const MAX_DELAY_SECS: u64 = 300;
const MULTIPLIER: f64 = 2.0;

/// Delay before the given retry attempt (1-based), capped at five minutes
pub fn retry_delay(attempt: u32) -> Duration {
    let delay = (INITIAL_DELAY_SECS as f64 * MULTIPLIER.powi(attempt.saturating_sub(1) as i32))
        as u64;
    Duration::from_secs(delay.min(MAX_DELAY_SECS))
}

/// Run `connect` up to `max_retries + 1` times with exponential backoff
/// between attempts, returning the first success or the last error.
pub async fn connect_with_backoff<T, E, F, Fut>(
    what: &str,
    max_retries: u32,
    mut connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match connect().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_retries => {
                attempt += 1;
                let delay = retry_delay(attempt);
                warn!(
                    target = what,
                    attempt,
                    ?delay,
                    error = %e,
                    "connection attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
