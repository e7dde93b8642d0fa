use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::idempotency::RequestLedger;

const LEDGER_PING_TIMEOUT: Duration = Duration::from_secs(5);
const LEDGER_SLOW_MS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyHealth {
    pub name: String,
    pub status: HealthStatus,
    pub latency_ms: Option<f64>,
    pub message: Option<String>,
}

impl DependencyHealth {
    pub fn healthy(name: impl Into<String>, latency_ms: f64) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
        }
    }

    pub fn degraded(name: impl Into<String>, latency_ms: f64, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Degraded,
            latency_ms: Some(latency_ms),
            message: Some(message.into()),
        }
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: Vec<DependencyHealth>,
}

impl AggregatedHealth {
    pub fn new(version: String, uptime_seconds: u64, dependencies: Vec<DependencyHealth>) -> Self {
        let status = if dependencies.iter().any(|d| d.status.is_unhealthy()) {
            HealthStatus::Unhealthy
        } else if dependencies.iter().all(|d| d.status.is_healthy()) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            version,
            uptime_seconds,
            dependencies,
        }
    }
}

/// Probes the request ledger for the health endpoints.
pub struct HealthChecker {
    ledger: Arc<dyn RequestLedger>,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(ledger: Arc<dyn RequestLedger>) -> Self {
        Self {
            ledger,
            start_time: Instant::now(),
        }
    }

    pub async fn check_all(&self) -> AggregatedHealth {
        AggregatedHealth::new(
            env!("CARGO_PKG_VERSION").to_string(),
            self.uptime_seconds(),
            vec![self.check_ledger().await],
        )
    }

    pub async fn check_ledger(&self) -> DependencyHealth {
        let start = Instant::now();

        match tokio::time::timeout(LEDGER_PING_TIMEOUT, self.ledger.ping()).await {
            Ok(Ok(())) => {
                let latency = start.elapsed().as_secs_f64() * 1000.0;
                if latency > LEDGER_SLOW_MS {
                    DependencyHealth::degraded("ledger", latency, "High latency detected")
                } else {
                    DependencyHealth::healthy("ledger", latency)
                }
            }
            Ok(Err(e)) => DependencyHealth::unhealthy("ledger", format!("Ping failed: {}", e)),
            Err(_) => DependencyHealth::unhealthy("ledger", "Ping timeout"),
        }
    }

    /// Ready when the ledger answers, even if slowly.
    pub async fn is_ready(&self) -> bool {
        !self.check_ledger().await.status.is_unhealthy()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
