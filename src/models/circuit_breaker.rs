use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Error percentage over the rolling window that opens the breaker.
    pub error_threshold_percentage: u32,
    /// Time spent open before a probe is allowed.
    pub reset_timeout: Duration,
    /// Hard limit on a single guarded call.
    pub call_timeout: Duration,
    pub rolling_window: Duration,
    pub rolling_buckets: u32,
    /// Minimum calls in the window before the error percentage is evaluated.
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            error_threshold_percentage: 50,
            reset_timeout: Duration::from_millis(30_000),
            call_timeout: Duration::from_millis(5_000),
            rolling_window: Duration::from_millis(10_000),
            rolling_buckets: 10,
            volume_threshold: 1,
        }
    }
}

/// Point-in-time view used by the health surface.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub service: String,
    pub state: CircuitState,
    pub successes: u32,
    pub failures: u32,
    pub error_percentage: u32,
}
