use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered from best to worst so a report's status is the max of its checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn worst<'a>(statuses: impl IntoIterator<Item = &'a HealthStatus>) -> HealthStatus {
        statuses
            .into_iter()
            .copied()
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    MessageBroker,
    PeerService,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub kind: ComponentKind,
    pub status: HealthStatus,

    /// Broker connection status as reported by the connection manager.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ComponentHealth {
    pub fn broker(status: HealthStatus, connection: &str) -> Self {
        Self {
            kind: ComponentKind::MessageBroker,
            status,
            connection: Some(connection.to_string()),
            response_time_ms: None,
            circuit_breaker: None,
            error: None,
        }
    }

    pub fn peer(status: HealthStatus, response_time_ms: u64, circuit_state: &str) -> Self {
        Self {
            kind: ComponentKind::PeerService,
            status,
            connection: None,
            response_time_ms: Some(response_time_ms),
            circuit_breaker: Some(circuit_state.to_string()),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
