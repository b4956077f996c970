//! Retrying client for the inference service

use protserve_core::{ClientConfig, ServeError, ServeResult};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics::{ErrorRecord, MetricsSnapshot, RequestMetrics};
use crate::retry::RetryPolicy;
use crate::transport::{ClientResponse, HttpTransport, OutboundRequest, Transport};

/// Client that retries failed requests with bounded exponential backoff and
/// keeps metrics about every attempt
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    metrics: RequestMetrics,
    pub(crate) health_path: String,
    pub(crate) recent_error_window: Duration,
}

impl ResilientClient {
    /// Create a client with default health settings
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        let defaults = ClientConfig::default();
        Self::build(transport, policy, &defaults)
    }

    /// Create an HTTP client from configuration
    pub fn from_config(config: &ClientConfig) -> ServeResult<Self> {
        let transport = Arc::new(HttpTransport::from_config(config)?);
        Self::with_transport(config, transport)
    }

    /// Create a client from configuration over a custom transport
    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn Transport>) -> ServeResult<Self> {
        config.validate()?;
        let policy = RetryPolicy::from_config(config)?;
        Ok(Self::build(transport, policy, config))
    }

    fn build(transport: Arc<dyn Transport>, policy: RetryPolicy, config: &ClientConfig) -> Self {
        info!(
            endpoint = transport.endpoint(),
            max_attempts = policy.max_attempts,
            timeout_ms = policy.request_timeout.as_millis() as u64,
            "Resilient client initialized"
        );

        Self {
            transport,
            policy,
            metrics: RequestMetrics::new(config.error_log_capacity),
            health_path: config.health_path.clone(),
            recent_error_window: config.recent_error_window(),
        }
    }

    /// The retry policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Where requests go
    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Send a request, retrying retryable failures
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> ServeResult<ClientResponse> {
        self.execute_cancellable(method, path, body, &CancellationToken::new())
            .await
    }

    /// Send a request, retrying retryable failures, until done or `cancel` fires.
    ///
    /// Non-2xx answers other than 408, 429 and 5xx are returned at once as
    /// [`ServeError::Remote`]. When every attempt fails the last error comes
    /// back inside [`ServeError::ExhaustedRetries`].
    pub async fn execute_cancellable(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        cancel: &CancellationToken,
    ) -> ServeResult<ClientResponse> {
        let request_id = Uuid::new_v4().to_string();
        let request = OutboundRequest {
            method,
            path: path.to_string(),
            body,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return Err(self.cancelled(&request_id, attempt));
            }

            debug!(
                request_id = %request_id,
                method = %request.method,
                path = %request.path,
                attempt = attempt,
                "Sending request"
            );

            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(&request_id, attempt)),
                result = tokio::time::timeout(self.policy.request_timeout, self.transport.send(&request)) => result,
            };
            let latency = started.elapsed();

            let err = match outcome {
                Ok(Ok(response)) if response.is_success() => {
                    self.metrics.record_success(latency);
                    info!(
                        request_id = %request_id,
                        status = response.status,
                        attempt = attempt,
                        latency_ms = latency.as_millis() as u64,
                        "Request succeeded"
                    );
                    return Ok(response);
                }
                Ok(Ok(response)) => ServeError::Remote {
                    status: response.status,
                    body: response.body,
                },
                Ok(Err(err)) => err,
                Err(_) => ServeError::Transport(format!(
                    "request timed out after {} ms",
                    self.policy.request_timeout.as_millis()
                )),
            };
            self.metrics
                .record_failure(&request_id, attempt, &err, latency);

            if !err.is_retryable() {
                warn!(
                    request_id = %request_id,
                    attempt = attempt,
                    error = %err,
                    "Request failed with non-retryable error"
                );
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                error!(
                    request_id = %request_id,
                    attempts = attempt,
                    error = %err,
                    "Request failed after all attempts"
                );
                return Err(ServeError::ExhaustedRetries {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.backoff_for(attempt);
            warn!(
                request_id = %request_id,
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Request attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(&request_id, attempt)),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn cancelled(&self, request_id: &str, attempt: u32) -> ServeError {
        info!(request_id = %request_id, attempt = attempt, "Request cancelled");
        ServeError::Cancelled
    }

    /// Copy of the client's metrics
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Failures within the configured recent-error window, most recent first
    pub fn recent_errors(&self) -> Vec<ErrorRecord> {
        self.metrics.recent_errors(self.recent_error_window)
    }
}
