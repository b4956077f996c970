//! Memory-bounded model cache

use futures::future::join_all;
use futures::FutureExt;
use protserve_core::{
    Loader, ModelDescriptor, ModelHandle, ModelInfo, ModelRegistry, ModelStatus, ServeConfig,
    ServeError, ServeResult,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::state::{CacheState, Evicted, InFlightLoad, Teardown};

/// Model cache manager
///
/// Keeps the sum of resident footprints within the budget, evicts the least
/// recently used model when a new one needs room, and runs at most one load
/// per key at a time. Loads run on a spawned task without holding the state
/// lock, so a caller that gives up waiting does not abort the load.
pub struct ModelCache {
    /// Known models
    registry: ModelRegistry,
    /// Materializes and tears down handles
    loader: Arc<dyn Loader>,
    /// Resident models, in-flight loads and budget counters
    state: Arc<RwLock<CacheState>>,
    /// Models to load by [`warm_up`](Self::warm_up)
    preload_keys: Vec<String>,
}

impl ModelCache {
    /// Create a new model cache
    pub fn new(registry: ModelRegistry, loader: Arc<dyn Loader>, budget: u64) -> Self {
        info!(
            budget = budget,
            models = registry.len(),
            loader = loader.name(),
            "Model cache initialized"
        );

        Self {
            registry,
            loader,
            state: Arc::new(RwLock::new(CacheState::new(budget))),
            preload_keys: Vec::new(),
        }
    }

    /// Create a cache from the `cache` and `models` configuration sections
    pub fn from_config(config: &ServeConfig, loader: Arc<dyn Loader>) -> ServeResult<Self> {
        let mut cache = Self::new(config.registry()?, loader, config.cache.max_memory_bytes);
        cache.preload_keys = config.cache.preload.clone();
        Ok(cache)
    }

    /// The model registry
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Return a handle to `key`, loading it first if needed
    pub async fn ensure_loaded(&self, key: &str) -> ServeResult<ModelHandle> {
        let pending = self.begin(key).await?;
        pending.await
    }

    /// Like [`ensure_loaded`](Self::ensure_loaded), but stop waiting at `deadline`.
    ///
    /// A load that is already running keeps going after the deadline and
    /// registers its model when it finishes.
    pub async fn ensure_loaded_until(
        &self,
        key: &str,
        deadline: Instant,
    ) -> ServeResult<ModelHandle> {
        let pending = tokio::time::timeout_at(deadline, self.begin(key))
            .await
            .map_err(|_| ServeError::DeadlineExceeded(format!("waiting for model {}", key)))??;

        tokio::time::timeout_at(deadline, pending)
            .await
            .map_err(|_| ServeError::DeadlineExceeded(format!("waiting for model {}", key)))?
    }

    /// Resolve `key` to a resident handle or to the load that will produce one
    async fn begin(&self, key: &str) -> ServeResult<InFlightLoad> {
        let mut state = self.state.write().await;

        if let Some(handle) = state.touch(key) {
            debug!(key = key, "Model cache hit");
            return Ok(futures::future::ready(Ok(handle)).boxed().shared());
        }

        if let Some(pending) = state.pending(key) {
            debug!(key = key, "Joining in-flight load");
            return Ok(pending);
        }

        let descriptor = self
            .registry
            .get(key)
            .cloned()
            .ok_or_else(|| ServeError::UnknownModel(key.to_string()))?;

        let evicted = state.make_room(key, descriptor.memory_estimate)?;
        let mut prior = schedule_teardown(&mut state, &self.loader, evicted);
        if let Some(teardown) = state.teardown_of(key) {
            debug!(key = key, "Reload waits for previous teardown");
            prior.push(teardown);
        }

        let reserved = descriptor.memory_estimate;
        let pending = self.spawn_load(descriptor, prior);
        state.begin_load(key, pending.clone(), reserved);

        Ok(pending)
    }

    /// Start the load task. The caller holds the state lock, so the task's
    /// commit always runs after the load has been registered. The load starts
    /// once every teardown in `prior` has finished.
    fn spawn_load(&self, descriptor: ModelDescriptor, prior: Vec<Teardown>) -> InFlightLoad {
        let state = Arc::clone(&self.state);
        let loader = Arc::clone(&self.loader);
        let key = descriptor.key.clone();

        let task = tokio::spawn(async move {
            join_all(prior).await;

            info!(key = %descriptor.key, estimate = descriptor.memory_estimate, "Loading model");
            let started = Instant::now();
            let outcome = AssertUnwindSafe(loader.load(&descriptor))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ServeError::Internal("loader panicked".to_string())))
                .map(|loaded| (loaded.handle, loaded.memory_bytes));

            let (result, cleanup) = {
                let mut state = state.write().await;
                let (result, evicted) = state.finish_load(&descriptor, outcome);
                (result, schedule_teardown(&mut state, &loader, evicted))
            };

            match &result {
                Ok(_) => info!(
                    key = %descriptor.key,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Model loaded"
                ),
                Err(e) => error!(key = %descriptor.key, error = %e, "Failed to load model"),
            }

            join_all(cleanup).await;
            result
        });

        async move {
            task.await.unwrap_or_else(|e| {
                Err(ServeError::Internal(format!(
                    "load task for {} failed: {}",
                    key, e
                )))
            })
        }
        .boxed()
        .shared()
    }

    /// Unload a resident model. No-op if it is not resident.
    pub async fn release(&self, key: &str) {
        let teardowns = {
            let mut state = self.state.write().await;
            match state.remove(key) {
                Some(entry) => {
                    info!(key = key, freed = entry.footprint, "Releasing model");
                    schedule_teardown(&mut state, &self.loader, vec![(key.to_string(), entry.handle)])
                }
                None => {
                    debug!(key = key, "Release requested for model that is not resident");
                    return;
                }
            }
        };
        join_all(teardowns).await;
    }

    /// Status of every registered model. Does not wait for in-flight loads.
    pub async fn status(&self) -> BTreeMap<String, ModelStatus> {
        let state = self.state.read().await;
        self.registry
            .iter()
            .map(|descriptor| (descriptor.key.clone(), state.status_of(descriptor)))
            .collect()
    }

    /// Descriptor and status for one model
    pub async fn model_info(&self, key: &str) -> ServeResult<ModelInfo> {
        let descriptor = self
            .registry
            .get(key)
            .ok_or_else(|| ServeError::UnknownModel(key.to_string()))?;
        let status = self.state.read().await.status_of(descriptor);

        Ok(ModelInfo {
            descriptor: descriptor.clone(),
            status,
        })
    }

    /// Bytes currently charged against the budget
    pub async fn total_memory_charged(&self) -> u64 {
        self.state.read().await.charged()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;

        CacheStats {
            budget: state.budget(),
            charged: state.charged(),
            reserved: state.reserved(),
            resident_models: state.resident_count(),
            loading_models: state.loading_count(),
            utilization: if state.budget() == 0 {
                0.0
            } else {
                (state.charged() as f64 / state.budget() as f64) * 100.0
            },
        }
    }

    /// Load each key in turn, logging failures. Returns the keys that failed.
    pub async fn preload(&self, keys: &[String]) -> Vec<String> {
        let mut failed = Vec::new();
        for key in keys {
            if let Err(e) = self.ensure_loaded(key).await {
                warn!(key = %key, error = %e, "Could not preload model");
                failed.push(key.clone());
            }
        }
        failed
    }

    /// Load the models listed under `cache.preload`. Returns the keys that failed.
    pub async fn warm_up(&self) -> Vec<String> {
        if self.preload_keys.is_empty() {
            return Vec::new();
        }
        info!(models = self.preload_keys.len(), "Preloading configured models");
        self.preload(&self.preload_keys).await
    }

    /// Unload every resident model. Loads still in flight register normally
    /// when they finish.
    pub async fn shutdown(&self) {
        info!("Shutting down model cache");
        let teardowns = {
            let mut state = self.state.write().await;
            let drained = state.drain();
            schedule_teardown(&mut state, &self.loader, drained)
        };
        join_all(teardowns).await;
        info!("Model cache shutdown complete");
    }
}

/// Start teardown of removed handles on spawned tasks and register each one
/// under its key, so a reload of that key waits for it. Runs under the state
/// lock; unload failures are logged only.
fn schedule_teardown(
    state: &mut CacheState,
    loader: &Arc<dyn Loader>,
    evicted: Evicted,
) -> Vec<Teardown> {
    evicted
        .into_iter()
        .map(|(key, handle)| {
            let loader = Arc::clone(loader);
            let unload_key = key.clone();
            let task = tokio::spawn(async move {
                match loader.unload(&unload_key, handle).await {
                    Ok(()) => info!(key = %unload_key, "Unloaded model"),
                    Err(e) => warn!(key = %unload_key, error = %e, "Model teardown failed"),
                }
            });

            let teardown_key = key.clone();
            let teardown: Teardown = async move {
                if let Err(e) = task.await {
                    warn!(key = %teardown_key, error = %e, "Model teardown task failed");
                }
            }
            .boxed()
            .shared();

            state.track_teardown(&key, teardown.clone());
            teardown
        })
        .collect()
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Memory budget in bytes
    pub budget: u64,
    /// Bytes charged by resident models
    pub charged: u64,
    /// Bytes held for in-flight loads
    pub reserved: u64,
    /// Number of resident models
    pub resident_models: usize,
    /// Number of in-flight loads
    pub loading_models: usize,
    /// Budget utilization percentage
    pub utilization: f64,
}
