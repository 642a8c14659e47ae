use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    circuit_breaker::CircuitBreakerConfig,
    retry::{MAX_RETRIES, RetryConfig, RetryPolicy},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_service_name")]
    pub service_name: String,

    pub rabbitmq_url: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_pending_publishes")]
    pub max_pending_publishes: usize,

    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_status_ttl_seconds")]
    pub status_ttl_seconds: u64,

    pub user_service_url: String,
    pub template_service_url: String,
    pub email_delivery_url: String,
    pub push_delivery_url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    #[serde(default = "default_error_threshold_percentage")]
    pub circuit_breaker_error_threshold_percentage: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub circuit_breaker_reset_timeout_ms: u64,
    #[serde(default = "default_rolling_window_ms")]
    pub circuit_breaker_rolling_window_ms: u64,
    #[serde(default = "default_volume_threshold")]
    pub circuit_breaker_volume_threshold: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_service_name() -> String {
    "notification_dispatch".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_max_retries() -> u32 {
    MAX_RETRIES
}

fn default_max_pending_publishes() -> usize {
    1024
}

fn default_status_ttl_seconds() -> u64 {
    86_400
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_health_check_timeout_ms() -> u64 {
    3_000
}

fn default_error_threshold_percentage() -> u32 {
    50
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_rolling_window_ms() -> u64 {
    10_000
}

fn default_volume_threshold() -> u32 {
    1
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    500
}

fn default_max_retry_delay_ms() -> u64 {
    2_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    4100
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.prefetch_count == 0 {
            return Err(anyhow!("PREFETCH_COUNT must be greater than zero"));
        }

        if self.circuit_breaker_error_threshold_percentage == 0
            || self.circuit_breaker_error_threshold_percentage > 100
        {
            return Err(anyhow!(
                "CIRCUIT_BREAKER_ERROR_THRESHOLD_PERCENTAGE must be within 1..=100"
            ));
        }

        if self.max_retry_attempts == 0 {
            return Err(anyhow!("MAX_RETRY_ATTEMPTS must be at least 1"));
        }

        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            error_threshold_percentage: self.circuit_breaker_error_threshold_percentage,
            reset_timeout: Duration::from_millis(self.circuit_breaker_reset_timeout_ms),
            call_timeout: self.request_timeout(),
            rolling_window: Duration::from_millis(self.circuit_breaker_rolling_window_ms),
            volume_threshold: self.circuit_breaker_volume_threshold,
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }
}
