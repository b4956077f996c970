//! Health checks against the inference service

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::ResilientClient;
use crate::metrics::ErrorRecord;

/// Outcome of a health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check report, combining the check result with client metrics
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// Endpoint that was checked
    pub endpoint: String,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub total_requests: u64,
    /// Failures within the recent-error window, most recent first
    pub recent_errors: Vec<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Health response body, when it is JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_info: Option<serde_json::Value>,
    /// Time spent on the check, retries included
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

impl ResilientClient {
    /// Request the health path. Failures are reported, never returned.
    pub async fn health_check(&self) -> HealthReport {
        let started = Instant::now();
        let outcome = self.execute(Method::GET, &self.health_path, None).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (status, service_info, error, error_kind) = match outcome {
            Ok(response) => {
                debug!(endpoint = self.endpoint(), "Health check passed");
                (
                    HealthStatus::Healthy,
                    response.json::<serde_json::Value>().ok(),
                    None,
                    None,
                )
            }
            Err(e) => {
                warn!(endpoint = self.endpoint(), error = %e, "Health check failed");
                (
                    HealthStatus::Unhealthy,
                    None,
                    Some(e.to_string()),
                    Some(e.root_cause().kind().to_string()),
                )
            }
        };

        let metrics = self.metrics_snapshot();
        HealthReport {
            status,
            endpoint: self.endpoint().to_string(),
            success_rate: metrics.success_rate,
            average_latency_ms: metrics.average_latency_ms,
            total_requests: metrics.total_requests,
            recent_errors: self.recent_errors(),
            error,
            error_kind,
            service_info,
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(HealthStatus::Unhealthy.to_string(), "unhealthy");
    }
}
