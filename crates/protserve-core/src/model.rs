//! Model descriptor, registry, status and inference request types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{ServeError, ServeResult};

/// Static description of a servable model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Registry key (e.g., "protgpt2")
    pub key: String,
    /// Estimated memory footprint in bytes
    pub memory_estimate: u64,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Architecture family (e.g., "gpt2", "protein_lm")
    #[serde(default)]
    pub model_type: String,
    /// Upstream model reference (e.g., "nferruz/ProtGPT2")
    #[serde(default)]
    pub source: Option<String>,
}

impl ModelDescriptor {
    /// Create a descriptor with empty metadata
    pub fn new(key: impl Into<String>, memory_estimate: u64) -> Self {
        Self {
            key: key.into(),
            memory_estimate,
            description: String::new(),
            model_type: String::new(),
            source: None,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Immutable set of known models, built once at startup
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    /// Build a registry, rejecting duplicate keys and zero footprints
    pub fn new(descriptors: impl IntoIterator<Item = ModelDescriptor>) -> ServeResult<Self> {
        let mut models = BTreeMap::new();
        for descriptor in descriptors {
            if descriptor.key.is_empty() {
                return Err(ServeError::Config("model key must not be empty".to_string()));
            }
            if descriptor.memory_estimate == 0 {
                return Err(ServeError::Config(format!(
                    "model {} must have a non-zero memory estimate",
                    descriptor.key
                )));
            }
            if models.contains_key(&descriptor.key) {
                return Err(ServeError::Config(format!(
                    "duplicate model key: {}",
                    descriptor.key
                )));
            }
            models.insert(descriptor.key.clone(), descriptor);
        }
        Ok(Self { models })
    }

    /// Look up a descriptor by key
    pub fn get(&self, key: &str) -> Option<&ModelDescriptor> {
        self.models.get(key)
    }

    /// Check if a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.models.contains_key(key)
    }

    /// Iterate descriptors in key order
    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether the registry has no models
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Point-in-time view of one registered model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Registry key
    pub key: String,
    /// Whether the model is resident
    pub resident: bool,
    /// Whether a load is in flight
    pub loading: bool,
    /// Bytes charged against the budget (0 if not resident)
    pub memory_bytes: u64,
    /// Last successful access
    pub last_used: Option<DateTime<Utc>>,
    /// When the resident copy finished loading
    pub loaded_at: Option<DateTime<Utc>>,
    /// Human-readable description
    pub description: String,
}

/// Descriptor plus residency details for one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Static descriptor
    #[serde(flatten)]
    pub descriptor: ModelDescriptor,
    /// Current status
    pub status: ModelStatus,
}

/// Sequence generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Optional prompt or seed sequence
    #[serde(default)]
    pub prompt: Option<String>,
    /// Target sequence length
    pub length: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Number of sequences to produce
    pub num_sequences: u32,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            prompt: None,
            length: 100,
            temperature: 0.8,
            num_sequences: 1,
        }
    }
}

/// One generated sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSequence {
    pub sequence: String,
    pub confidence: f64,
}

/// Sequence generation result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOutput {
    /// Model that produced the sequences
    pub model: String,
    pub sequences: Vec<GeneratedSequence>,
}

/// Sequence optimization request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeRequest {
    /// Input sequence
    pub sequence: String,
    /// Objectives such as "stability" or "activity"
    pub objectives: Vec<String>,
}

/// Score change for one optimization objective
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveImprovement {
    pub objective: String,
    pub score_improvement: f64,
    pub confidence: f64,
}

/// Sequence optimization result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeOutput {
    pub original_sequence: String,
    pub optimized_sequence: String,
    #[serde(default)]
    pub improvements: Vec<ObjectiveImprovement>,
}
