use thiserror::Error;

/// Failures on the broker side of the dispatch layer.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Publish backpressure: {0}")]
    Backpressure(String),

    #[error("Message broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Broker protocol error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Whether the caller may retry the same publish call later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Backpressure(_)
                | DispatchError::BrokerUnavailable(_)
                | DispatchError::Broker(_)
        )
    }
}

/// Failures of synchronous calls to peer services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service unavailable: circuit breaker for {service} is open")]
    CircuitOpen { service: String },

    #[error("Request to {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("Request to {service} failed: {message}")]
    Transport { service: String, message: String },

    #[error("{service} responded with status {status}: {body}")]
    Downstream {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {service}: {message}")]
    Decode { service: String, message: String },

    #[error("Failed to encode request for {service}: {message}")]
    Encode { service: String, message: String },
}

impl ServiceError {
    /// Timeouts, network errors and 5xx responses count against the breaker.
    pub fn counts_as_failure(&self) -> bool {
        match self {
            ServiceError::Timeout { .. } | ServiceError::Transport { .. } => true,
            ServiceError::Downstream { status, .. } => *status >= 500,
            ServiceError::CircuitOpen { .. }
            | ServiceError::Decode { .. }
            | ServiceError::Encode { .. } => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.counts_as_failure()
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ServiceError::CircuitOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_do_not_trip_the_breaker() {
        let not_found = ServiceError::Downstream {
            service: "user_service".to_string(),
            status: 404,
            body: String::new(),
        };
        assert!(!not_found.counts_as_failure());

        let bad_gateway = ServiceError::Downstream {
            service: "user_service".to_string(),
            status: 502,
            body: String::new(),
        };
        assert!(bad_gateway.counts_as_failure());
        assert!(!ServiceError::CircuitOpen { service: "x".into() }.counts_as_failure());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!DispatchError::Validation("bad".into()).is_retryable());
        assert!(DispatchError::Backpressure("full".into()).is_retryable());
    }
}
