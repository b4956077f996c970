//! Retry policy

use protserve_core::{ClientConfig, ServeError, ServeResult};
use std::time::Duration;

/// How often and how patiently a request is retried
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_backoff: Duration,
    /// Growth factor for each further delay
    pub multiplier: f64,
    /// Upper bound for a single delay
    pub max_backoff: Duration,
    /// Bound on a single attempt
    pub request_timeout: Duration,
}

impl RetryPolicy {
    /// Build a policy from the client configuration
    pub fn from_config(config: &ClientConfig) -> ServeResult<Self> {
        let policy = Self {
            max_attempts: config.max_attempts,
            base_backoff: config.base_backoff(),
            multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff(),
            request_timeout: config.request_timeout(),
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Validate policy parameters
    pub fn validate(&self) -> ServeResult<()> {
        if self.max_attempts == 0 {
            return Err(ServeError::Config("Max attempts must be at least 1".to_string()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ServeError::Config(
                "Backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ServeError::Config("Timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// Delay before the attempt that follows failed attempt `attempt` (1-based):
    /// `min(base * multiplier^(attempt - 1), max)`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_backoff.as_secs_f64() * self.multiplier.powi(exponent);

        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Sum of every delay a request that always fails will sleep through
    pub fn worst_case_backoff(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.backoff_for(a)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let config = ClientConfig::default();
        Self {
            max_attempts: config.max_attempts,
            base_backoff: config.base_backoff(),
            multiplier: config.backoff_multiplier,
            max_backoff: config.max_backoff(),
            request_timeout: config.request_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32, base_secs: u64, multiplier: f64, max_secs: u64) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            base_backoff: Duration::from_secs(base_secs),
            multiplier,
            max_backoff: Duration::from_secs(max_secs),
            request_timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(3, 1, 2.0, 10);
        assert_eq!(p.backoff_for(1), Duration::from_secs(1));
        assert_eq!(p.backoff_for(2), Duration::from_secs(2));
        assert_eq!(p.worst_case_backoff(), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_is_capped() {
        let p = policy(5, 1, 3.0, 4);
        let delays: Vec<u64> = (1..5).map(|a| p.backoff_for(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 3, 4, 4]);
    }

    #[test]
    fn test_backoff_huge_attempt_saturates() {
        let p = policy(5, 1, 2.0, 60);
        assert_eq!(p.backoff_for(10_000), Duration::from_secs(60));
        assert_eq!(p.backoff_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_constant_backoff() {
        let p = policy(4, 2, 1.0, 60);
        assert_eq!(p.backoff_for(1), Duration::from_secs(2));
        assert_eq!(p.backoff_for(3), Duration::from_secs(2));
    }

    #[test]
    fn test_from_config() {
        let config = ClientConfig {
            max_attempts: 3,
            base_backoff_ms: 250,
            ..Default::default()
        };
        let p = RetryPolicy::from_config(&config).unwrap();
        assert_eq!(p.max_attempts, 3);
        assert_eq!(p.backoff_for(1), Duration::from_millis(250));
        assert_eq!(p.request_timeout, Duration::from_secs(60));
        assert_eq!(RetryPolicy::default().max_attempts, 5);
    }

    #[test]
    fn test_validation() {
        assert!(policy(0, 1, 2.0, 10).validate().is_err());
        assert!(policy(3, 1, 0.5, 10).validate().is_err());
        assert!(policy(3, 1, f64::NAN, 10).validate().is_err());
        assert!(policy(1, 1, 1.0, 10).validate().is_ok());
    }
}
