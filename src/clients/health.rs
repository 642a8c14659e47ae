use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::{
    clients::{broker::ConnectionManager, service::ServiceClient},
    models::{
        circuit_breaker::{CircuitSnapshot, CircuitState},
        health::{ComponentHealth, HealthReport, HealthStatus},
    },
};

pub struct HealthChecker {
    service_name: String,
    manager: Arc<dyn ConnectionManager>,
    peers: Vec<Arc<ServiceClient>>,
}

impl HealthChecker {
    pub fn new(
        service_name: &str,
        manager: Arc<dyn ConnectionManager>,
        peers: Vec<Arc<ServiceClient>>,
    ) -> Self {
        Self {
            service_name: service_name.to_string(),
            manager,
            peers,
        }
    }

    pub async fn check_all(&self) -> HealthReport {
        let mut checks = HashMap::new();

        checks.insert("message_broker".to_string(), self.check_broker());

        let peer_checks = join_all(self.peers.iter().map(|peer| check_peer(peer))).await;
        for (peer, health) in self.peers.iter().zip(peer_checks) {
            checks.insert(peer.service_name().to_string(), health);
        }

        HealthReport {
            status: HealthStatus::worst(checks.values().map(|check| &check.status)),
            service: self.service_name.clone(),
            timestamp: Utc::now(),
            checks,
        }
    }

    pub fn circuits(&self) -> Vec<CircuitSnapshot> {
        self.peers.iter().map(|peer| peer.circuit_snapshot()).collect()
    }

    /// Reads the manager's status only; a health probe never triggers a reconnect.
    fn check_broker(&self) -> ComponentHealth {
        let status = self.manager.status();

        if status.is_connected() {
            ComponentHealth::broker(HealthStatus::Healthy, status.as_str())
        } else {
            warn!(connection = %status.as_str(), "Message broker is not connected");
            ComponentHealth::broker(HealthStatus::Unhealthy, status.as_str())
                .with_error("Broker channel unavailable")
        }
    }
}

/// A peer is healthy only when reachable with a closed breaker. Anything else degrades.
async fn check_peer(peer: &ServiceClient) -> ComponentHealth {
    let start = Instant::now();
    let reachable = peer.health_check().await;
    let elapsed = start.elapsed().as_millis() as u64;
    let state = peer.circuit_state();

    debug!(
        service = %peer.service_name(),
        reachable,
        circuit_state = %state.as_str(),
        response_time_ms = elapsed,
        "Peer health checked"
    );

    match (reachable, state) {
        (true, CircuitState::Closed) => {
            ComponentHealth::peer(HealthStatus::Healthy, elapsed, state.as_str())
        }
        (true, CircuitState::HalfOpen) => {
            ComponentHealth::peer(HealthStatus::Degraded, elapsed, state.as_str())
                .with_error("Circuit breaker in recovery mode")
        }
        (true, CircuitState::Open) => {
            ComponentHealth::peer(HealthStatus::Degraded, elapsed, state.as_str())
                .with_error("Circuit breaker is open")
        }
        (false, _) => ComponentHealth::peer(HealthStatus::Degraded, elapsed, state.as_str())
            .with_error("Health endpoint unreachable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_check_wins() {
        let healthy = HealthStatus::Healthy;
        let degraded = HealthStatus::Degraded;
        let unhealthy = HealthStatus::Unhealthy;

        assert_eq!(HealthStatus::worst([]), HealthStatus::Healthy);
        assert_eq!(HealthStatus::worst([&healthy, &healthy]), HealthStatus::Healthy);
        assert_eq!(HealthStatus::worst([&healthy, &degraded]), HealthStatus::Degraded);
        assert_eq!(
            HealthStatus::worst([&degraded, &unhealthy, &healthy]),
            HealthStatus::Unhealthy
        );
    }
}
