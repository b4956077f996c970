//! Capability traits for loaded models and the loaders that produce them

use async_trait::async_trait;
use std::sync::Arc;

use crate::{
    GenerateOutput, GenerateRequest, ModelDescriptor, OptimizeOutput, OptimizeRequest, ServeError,
    ServeResult,
};

/// Reference to a loaded model, handed out by the cache
pub type ModelHandle = Arc<dyn Model>;

/// Typed inference operations offered by a loaded model
#[async_trait]
pub trait Model: Send + Sync {
    /// Registry key of the model behind this handle
    fn key(&self) -> &str;

    /// Generate one or more sequences
    async fn generate(&self, request: &GenerateRequest) -> ServeResult<GenerateOutput>;

    /// Optimize a sequence towards the given objectives
    async fn optimize(&self, request: &OptimizeRequest) -> ServeResult<OptimizeOutput> {
        let _ = request;
        Err(ServeError::Unsupported(format!(
            "model {} does not support optimization",
            self.key()
        )))
    }
}

/// Result of a successful load
pub struct LoadedModel {
    /// The materialized model
    pub handle: ModelHandle,
    /// Actual footprint in bytes; 0 means "use the descriptor's estimate"
    pub memory_bytes: u64,
}

impl LoadedModel {
    /// Wrap a handle whose footprint matches the descriptor's estimate
    pub fn new(handle: ModelHandle) -> Self {
        Self {
            handle,
            memory_bytes: 0,
        }
    }

    /// Wrap a handle with a measured footprint
    pub fn with_memory(handle: ModelHandle, memory_bytes: u64) -> Self {
        Self {
            handle,
            memory_bytes,
        }
    }
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("key", &self.handle.key())
            .field("memory_bytes", &self.memory_bytes)
            .finish()
    }
}

/// Loader trait for materializing models
#[async_trait]
pub trait Loader: Send + Sync {
    /// Load the model described by `descriptor`. May be slow.
    async fn load(&self, descriptor: &ModelDescriptor) -> ServeResult<LoadedModel>;

    /// Best-effort teardown of a handle that is leaving the cache
    async fn unload(&self, key: &str, handle: ModelHandle) -> ServeResult<()> {
        let _ = (key, handle);
        Ok(())
    }

    /// Get the loader name
    fn name(&self) -> &'static str;
}
