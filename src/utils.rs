use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::{message::Channel, retry::RetryConfig};

pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// `msg_<epoch_ms>_<suffix>`, used when the publisher is not given an id.
pub fn generate_message_id() -> String {
    format!("msg_{}_{}", epoch_millis(), rand::random_range(1000..10000))
}

/// `req_<epoch_ms>_<suffix>`, stamped as `X-Request-ID` on outgoing calls.
pub fn generate_request_id() -> String {
    format!("req_{}_{}", epoch_millis(), rand::random_range(1000..10000))
}

static NOTIFICATION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// `<channel>_<epoch_ms><seq>`; the four-digit process-local sequence keeps ids
/// minted in the same millisecond distinct.
pub fn default_notification_id(channel: Channel) -> String {
    let sequence = NOTIFICATION_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 10_000;
    format!("{}_{}{:04}", channel.as_str(), epoch_millis(), sequence)
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_when(config, |_| true, operation).await
}

/// Like [`retry_with_backoff`], but gives up at once on errors `should_retry` rejects.
pub async fn retry_when<F, Fut, T, E, P>(
    config: &RetryConfig,
    should_retry: P,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(attempt, error = %e, "Error is not retryable");
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);

                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(delay_ms * config.backoff_multiplier, config.max_delay_ms);
            }
        }
    }
}
