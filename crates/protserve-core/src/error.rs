//! Error types for protserve

use thiserror::Error;

/// Main error type for protserve
///
/// The enum is `Clone` so that the outcome of one in-flight model load can be
/// handed to every caller that joined it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServeError {
    /// The requested key is not in the model registry
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// The model cannot fit in the budget even with every other model evicted
    #[error("Insufficient memory budget for model {key}: requires {required} bytes, budget is {budget} bytes")]
    InsufficientBudget {
        key: String,
        required: u64,
        budget: u64,
    },

    /// The loader failed to materialize the model
    #[error("Loader error for model {key}: {source}")]
    Loader {
        key: String,
        #[source]
        source: Box<ServeError>,
    },

    /// Connection-level failure, including per-attempt timeouts
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-2xx status
    #[error("Remote error: status {status}: {body}")]
    Remote { status: u16, body: String },

    /// Every attempt failed; `source` is the last observed failure
    #[error("Request failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<ServeError>,
    },

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// The caller's deadline passed before the operation finished
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The handle does not support the requested operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for protserve operations
pub type ServeResult<T> = Result<T, ServeError>;

impl ServeError {
    /// Stable, machine-readable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ServeError::UnknownModel(_) => "unknown_model",
            ServeError::InsufficientBudget { .. } => "insufficient_budget",
            ServeError::Loader { .. } => "loader",
            ServeError::Transport(_) => "transport",
            ServeError::Remote { .. } => "remote",
            ServeError::ExhaustedRetries { .. } => "exhausted_retries",
            ServeError::Cancelled => "cancelled",
            ServeError::DeadlineExceeded(_) => "deadline_exceeded",
            ServeError::Config(_) => "config",
            ServeError::Serialization(_) => "serialization",
            ServeError::Unsupported(_) => "unsupported",
            ServeError::Internal(_) => "internal",
        }
    }

    /// Whether a failed request attempt may be retried.
    ///
    /// Transport failures and 5xx responses are retryable. Client errors are
    /// not, except 408 (request timeout) and 429 (too many requests).
    pub fn is_retryable(&self) -> bool {
        match self {
            ServeError::Transport(_) => true,
            ServeError::Remote { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            _ => false,
        }
    }

    /// Number of attempts recorded on the error, if it came out of a retry loop
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ServeError::ExhaustedRetries { attempts, .. } => Some(*attempts),
            ServeError::Loader { source, .. } => source.attempts(),
            _ => None,
        }
    }

    /// Wrap a loader failure for `key`, leaving an existing loader error as is
    pub fn loader(key: &str, err: ServeError) -> Self {
        match err {
            err @ ServeError::Loader { .. } => err,
            other => ServeError::Loader {
                key: key.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost cause, unwrapping `ExhaustedRetries` and `Loader`
    pub fn root_cause(&self) -> &ServeError {
        match self {
            ServeError::ExhaustedRetries { source, .. } | ServeError::Loader { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }
}

impl From<serde_json::Error> for ServeError {
    fn from(err: serde_json::Error) -> Self {
        ServeError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ServeError {
    fn from(err: toml::de::Error) -> Self {
        ServeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ServeError {
    fn from(err: toml::ser::Error) -> Self {
        ServeError::Serialization(err.to_string())
    }
}

impl From<::config::ConfigError> for ServeError {
    fn from(err: ::config::ConfigError) -> Self {
        ServeError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServeError::Config("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");
    }

    #[test]
    fn test_exhausted_retries_keeps_cause() {
        let err = ServeError::ExhaustedRetries {
            attempts: 3,
            source: Box::new(ServeError::Transport("connection refused".to_string())),
        };
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.kind(), "exhausted_retries");
        assert!(matches!(err.root_cause(), ServeError::Transport(_)));
        assert_eq!(
            err.to_string(),
            "Request failed after 3 attempts: Transport error: connection refused"
        );

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_loader_wrapping() {
        let err = ServeError::loader("protgpt2", ServeError::Internal("disk read failed".to_string()));
        assert_eq!(
            err.to_string(),
            "Loader error for model protgpt2: Internal error: disk read failed"
        );

        let rewrapped = ServeError::loader("other", err);
        match rewrapped {
            ServeError::Loader { key, .. } => assert_eq!(key, "protgpt2"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ServeError::Transport("reset".to_string()).is_retryable());
        let remote = |status| ServeError::Remote {
            status,
            body: String::new(),
        };
        assert!(remote(500).is_retryable());
        assert!(remote(503).is_retryable());
        assert!(remote(408).is_retryable());
        assert!(remote(429).is_retryable());
        assert!(!remote(400).is_retryable());
        assert!(!remote(404).is_retryable());
        assert!(!ServeError::Cancelled.is_retryable());
        assert!(!ServeError::UnknownModel("x".to_string()).is_retryable());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ServeError = json_err.into();
        assert!(matches!(err, ServeError::Serialization(_)));
    }
}
