/// Backoff settings for synchronous calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 2_000,
            backoff_multiplier: 2,
        }
    }
}

pub const MAX_RETRIES: u32 = 3;

/// What happens to a delivery whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to the live queue carrying `next_attempt` as its retry count.
    Retry { next_attempt: u32 },
    /// Budget exhausted, hand the delivery to the dead-letter exchange.
    DeadLetter,
}

/// Redelivery budget for consumed messages. The count lives in the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn decide(&self, retry_count: u32) -> RetryDecision {
        let next_attempt = retry_count.saturating_add(1);

        if next_attempt < self.max_retries {
            RetryDecision::Retry { next_attempt }
        } else {
            RetryDecision::DeadLetter
        }
    }

    /// A message that already used its budget must not reach a handler again.
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}
