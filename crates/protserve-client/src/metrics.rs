//! Request metrics for one client instance

use chrono::{DateTime, Utc};
use protserve_core::ServeError;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One failed attempt
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Request the attempt belonged to
    pub request_id: String,
    pub attempt: u32,
    /// Error text
    pub error: String,
    /// Machine-readable error kind
    pub kind: String,
    /// HTTP status, when the remote answered
    pub status: Option<u16>,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Point-in-time copy of the metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    /// Bounded error log, most recent first
    pub errors: Vec<ErrorRecord>,
    pub last_updated: DateTime<Utc>,
}

struct Counters {
    total: u64,
    successes: u64,
    failures: u64,
    cumulative_latency: Duration,
    errors: VecDeque<ErrorRecord>,
    last_updated: DateTime<Utc>,
}

/// Attempt counters, latency totals and a bounded log of recent failures.
///
/// Every completed attempt is counted, so a request that succeeds on its
/// third attempt adds two failures and one success.
pub struct RequestMetrics {
    counters: Mutex<Counters>,
    capacity: usize,
}

impl RequestMetrics {
    /// Create metrics that keep at most `capacity` error records
    pub fn new(capacity: usize) -> Self {
        Self {
            counters: Mutex::new(Counters {
                total: 0,
                successes: 0,
                failures: 0,
                cumulative_latency: Duration::ZERO,
                errors: VecDeque::with_capacity(capacity),
                last_updated: Utc::now(),
            }),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful attempt
    pub fn record_success(&self, latency: Duration) {
        let mut counters = self.lock();
        counters.total += 1;
        counters.successes += 1;
        counters.cumulative_latency += latency;
        counters.last_updated = Utc::now();
    }

    /// Record a failed attempt and append it to the error log
    pub fn record_failure(
        &self,
        request_id: &str,
        attempt: u32,
        error: &ServeError,
        latency: Duration,
    ) {
        let now = Utc::now();
        let record = ErrorRecord {
            request_id: request_id.to_string(),
            attempt,
            error: error.to_string(),
            kind: error.kind().to_string(),
            status: match error {
                ServeError::Remote { status, .. } => Some(*status),
                _ => None,
            },
            latency_ms: latency.as_secs_f64() * 1000.0,
            timestamp: now,
        };

        let mut counters = self.lock();
        counters.total += 1;
        counters.failures += 1;
        counters.cumulative_latency += latency;
        counters.last_updated = now;
        if counters.errors.len() >= self.capacity {
            counters.errors.pop_front();
        }
        counters.errors.push_back(record);
    }

    /// Failures recorded within `window` of now, most recent first
    pub fn recent_errors(&self, window: Duration) -> Vec<ErrorRecord> {
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .and_then(|w| Utc::now().checked_sub_signed(w));

        self.lock()
            .errors
            .iter()
            .rev()
            .filter(|e| cutoff.map_or(true, |c| e.timestamp > c))
            .cloned()
            .collect()
    }

    /// Copy out counters, derived rates and the error log
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.lock();

        let success_rate = if counters.total == 0 {
            0.0
        } else {
            counters.successes as f64 / counters.total as f64
        };
        let average_latency_ms = if counters.total == 0 {
            0.0
        } else {
            counters.cumulative_latency.as_secs_f64() * 1000.0 / counters.total as f64
        };

        MetricsSnapshot {
            total_requests: counters.total,
            successful_requests: counters.successes,
            failed_requests: counters.failures,
            success_rate,
            error_rate: 1.0 - success_rate,
            average_latency_ms,
            errors: counters.errors.iter().rev().cloned().collect(),
            last_updated: counters.last_updated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_error(n: usize) -> ServeError {
        ServeError::Transport(format!("connection refused #{}", n))
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = RequestMetrics::new(10);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 0);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.error_rate, 1.0);
        assert_eq!(snapshot.average_latency_ms, 0.0);
        assert!(snapshot.errors.is_empty());
    }

    #[test]
    fn test_rates_and_latency() {
        let metrics = RequestMetrics::new(10);
        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(200));
        metrics.record_success(Duration::from_millis(300));
        metrics.record_failure("req", 1, &transport_error(0), Duration::from_millis(400));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.successful_requests, 3);
        assert_eq!(snapshot.failed_requests, 1);
        assert!((snapshot.success_rate - 0.75).abs() < 1e-9);
        assert!((snapshot.error_rate - 0.25).abs() < 1e-9);
        assert!((snapshot.average_latency_ms - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_error_log_is_capped_and_newest_first() {
        let metrics = RequestMetrics::new(3);
        for n in 0..5 {
            metrics.record_failure("req", n as u32 + 1, &transport_error(n), Duration::ZERO);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_requests, 5);
        let messages: Vec<&str> = snapshot.errors.iter().map(|e| e.error.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Transport error: connection refused #4",
                "Transport error: connection refused #3",
                "Transport error: connection refused #2",
            ]
        );
    }

    #[test]
    fn test_remote_status_recorded() {
        let metrics = RequestMetrics::new(3);
        let err = ServeError::Remote {
            status: 503,
            body: "busy".to_string(),
        };
        metrics.record_failure("req-1", 2, &err, Duration::from_millis(5));

        let record = &metrics.snapshot().errors[0];
        assert_eq!(record.status, Some(503));
        assert_eq!(record.kind, "remote");
        assert_eq!(record.request_id, "req-1");
        assert_eq!(record.attempt, 2);
    }

    #[test]
    fn test_recent_errors_window() {
        let metrics = RequestMetrics::new(5);
        metrics.record_failure("a", 1, &transport_error(1), Duration::ZERO);
        metrics.record_failure("b", 1, &transport_error(2), Duration::ZERO);

        let recent = metrics.recent_errors(Duration::from_secs(300));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request_id, "b");
        assert!(metrics.recent_errors(Duration::ZERO).is_empty());
    }
}
