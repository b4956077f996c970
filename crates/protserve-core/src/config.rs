//! Configuration types for protserve

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{ModelDescriptor, ModelRegistry, ServeError, ServeResult};

/// Prefix for environment overrides, e.g. `PROTSERVE__CLIENT__BASE_URL`
pub const ENV_PREFIX: &str = "PROTSERVE";

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Top-level configuration, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Model cache configuration
    pub cache: CacheConfig,
    /// Resilient client configuration
    pub client: ClientConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Model registry
    pub models: Vec<ModelDescriptor>,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            client: ClientConfig::default(),
            logging: LoggingConfig::default(),
            models: default_models(),
        }
    }
}

impl ServeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> ServeResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServeError::Config(format!("Failed to read config file: {}", e)))?;
        let config: ServeConfig = toml::from_str(&content)
            .map_err(|e| ServeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional file layered under environment overrides
    pub fn load(path: Option<&Path>) -> ServeResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: ServeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> ServeResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every section for values the services cannot run with
    pub fn validate(&self) -> ServeResult<()> {
        self.cache.validate()?;
        self.client.validate()?;
        let registry = self.registry()?;
        for key in &self.cache.preload {
            if !registry.contains(key) {
                return Err(ServeError::Config(format!(
                    "preload references unknown model: {}",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Build the model registry from the `models` section
    pub fn registry(&self) -> ServeResult<ModelRegistry> {
        ModelRegistry::new(self.models.iter().cloned())
    }
}

/// Model cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Memory budget for resident models in bytes
    pub max_memory_bytes: u64,
    /// Models to load at startup
    pub preload: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 6 * GIB,
            preload: Vec::new(),
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> ServeResult<()> {
        if self.max_memory_bytes == 0 {
            return Err(ServeError::Config(
                "cache.max_memory_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resilient client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the inference service
    pub base_url: String,
    /// Per-attempt timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Total attempts per request, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt in milliseconds
    pub base_backoff_ms: u64,
    /// Growth factor applied to the delay after each further failure
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay in milliseconds
    pub max_backoff_ms: u64,
    /// Path requested by health checks
    pub health_path: String,
    /// Number of failures kept in the error log
    pub error_log_capacity: usize,
    /// Age limit for errors reported as recent by health checks, in seconds
    pub recent_error_window_secs: u64,
    /// Idle connections kept per host
    pub pool_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            request_timeout_ms: 60_000,
            max_attempts: 5,
            base_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
            health_path: "/health".to_string(),
            error_log_capacity: 100,
            recent_error_window_secs: 300,
            pool_size: 10,
        }
    }
}

impl ClientConfig {
    /// Per-attempt timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay after the first failed attempt
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    /// Upper bound for a single delay
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Age limit for recent errors
    pub fn recent_error_window(&self) -> Duration {
        Duration::from_secs(self.recent_error_window_secs)
    }

    /// Validate client parameters
    pub fn validate(&self) -> ServeResult<()> {
        if self.base_url.is_empty() {
            return Err(ServeError::Config("client.base_url must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ServeError::Config("Timeout must be positive".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ServeError::Config("Max attempts must be at least 1".to_string()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ServeError::Config(
                "Backoff multiplier must be at least 1.0".to_string(),
            ));
        }
        if self.max_backoff_ms == 0 {
            return Err(ServeError::Config("Max retry delay must be positive".to_string()));
        }
        if self.error_log_capacity == 0 {
            return Err(ServeError::Config(
                "Error log capacity must be positive".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(ServeError::Config(
                "Connection pool size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

fn default_models() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor {
            key: "protflash".to_string(),
            memory_estimate: 3 * GIB / 2,
            description: "Lightweight protein language model".to_string(),
            model_type: "transformer".to_string(),
            source: None,
        },
        ModelDescriptor {
            key: "esm2_small".to_string(),
            memory_estimate: 600 * MIB,
            description: "ESM-2 small protein language model".to_string(),
            model_type: "protein_lm".to_string(),
            source: Some("facebook/esm2_t6_8M_UR50D".to_string()),
        },
        ModelDescriptor {
            key: "protgpt2".to_string(),
            memory_estimate: 500 * MIB,
            description: "GPT-2 based protein generation model".to_string(),
            model_type: "gpt2".to_string(),
            source: Some("nferruz/ProtGPT2".to_string()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServeConfig::default();
        assert_eq!(config.cache.max_memory_bytes, 6 * GIB);
        assert_eq!(config.client.base_url, "http://localhost:8001");
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.client.backoff_multiplier, 2.0);
        assert_eq!(config.client.max_backoff(), Duration::from_secs(60));
        assert_eq!(config.client.error_log_capacity, 100);
        assert_eq!(config.models.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_parse() {
        let toml_str = r#"
[cache]
max_memory_bytes = 3000

[client]
base_url = "http://inference:8002"
max_attempts = 3

[[models]]
key = "a"
memory_estimate = 1000
description = "model a"

[[models]]
key = "b"
memory_estimate = 1000
"#;
        let config: ServeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.cache.max_memory_bytes, 3000);
        assert_eq!(config.client.base_url, "http://inference:8002");
        assert_eq!(config.client.max_attempts, 3);
        assert_eq!(config.client.request_timeout_ms, 60_000);
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[1].description, "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_validation() {
        let mut client = ClientConfig::default();
        client.request_timeout_ms = 0;
        assert!(client.validate().is_err());

        let mut client = ClientConfig::default();
        client.max_attempts = 0;
        assert!(client.validate().is_err());

        let mut client = ClientConfig::default();
        client.backoff_multiplier = 0.5;
        assert!(client.validate().is_err());

        let mut client = ClientConfig::default();
        client.backoff_multiplier = 1.0;
        assert!(client.validate().is_ok());
    }

    #[test]
    fn test_unknown_preload_rejected() {
        let mut config = ServeConfig::default();
        config.cache.preload = vec!["missing".to_string()];
        assert!(matches!(config.validate(), Err(ServeError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protserve.toml");
        std::fs::write(
            &path,
            "[client]\nmax_attempts = 2\n\n[cache]\npreload = [\"protgpt2\"]\n",
        )
        .unwrap();

        let config = ServeConfig::from_file(&path).unwrap();
        assert_eq!(config.client.max_attempts, 2);
        assert_eq!(config.cache.preload, vec!["protgpt2".to_string()]);
    }

    #[test]
    fn test_toml_roundtrip_of_defaults() {
        let rendered = ServeConfig::default().to_toml_string().unwrap();
        let parsed: ServeConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.models, ServeConfig::default().models);
    }
}
