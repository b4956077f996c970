//! Budget accounting and LRU bookkeeping behind the cache lock

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use protserve_core::{ModelDescriptor, ModelHandle, ModelStatus, ServeError, ServeResult};
use std::collections::HashMap;
use tracing::warn;

/// Outcome of a load, shared by every caller waiting on it
pub(crate) type InFlightLoad = Shared<BoxFuture<'static, ServeResult<ModelHandle>>>;

/// Handles removed from the cache that still need a teardown call
pub(crate) type Evicted = Vec<(String, ModelHandle)>;

/// Completion of a spawned `Loader::unload` call
pub(crate) type Teardown = Shared<BoxFuture<'static, ()>>;

/// One resident model
pub(crate) struct LoadedModelEntry {
    pub handle: ModelHandle,
    /// Bytes charged against the budget
    pub footprint: u64,
    pub last_used: DateTime<Utc>,
    /// Logical access clock; strictly increasing, so LRU ties cannot occur
    pub last_tick: u64,
    pub loaded_at: DateTime<Utc>,
}

struct PendingLoad {
    future: InFlightLoad,
    reserved: u64,
}

/// Process-wide cache state. Invariant: `charged + reserved <= budget`.
pub(crate) struct CacheState {
    budget: u64,
    charged: u64,
    reserved: u64,
    tick: u64,
    entries: HashMap<String, LoadedModelEntry>,
    loading: HashMap<String, PendingLoad>,
    /// Teardowns that may still be running; a reload of the key waits on them
    tearing_down: HashMap<String, Teardown>,
}

impl CacheState {
    pub fn new(budget: u64) -> Self {
        Self {
            budget,
            charged: 0,
            reserved: 0,
            tick: 0,
            entries: HashMap::new(),
            loading: HashMap::new(),
            tearing_down: HashMap::new(),
        }
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn charged(&self) -> u64 {
        self.charged
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    pub fn resident_count(&self) -> usize {
        self.entries.len()
    }

    pub fn loading_count(&self) -> usize {
        self.loading.len()
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Return the handle of a resident model and mark it most recently used
    pub fn touch(&mut self, key: &str) -> Option<ModelHandle> {
        let tick = self.next_tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = Utc::now();
        entry.last_tick = tick;
        Some(entry.handle.clone())
    }

    /// The in-flight load for `key`, if any
    pub fn pending(&self, key: &str) -> Option<InFlightLoad> {
        self.loading.get(key).map(|p| p.future.clone())
    }

    /// Remember a teardown started for `key`
    pub fn track_teardown(&mut self, key: &str, teardown: Teardown) {
        self.tearing_down.insert(key.to_string(), teardown);
    }

    /// The unfinished teardown of `key`, if any. Finished ones are dropped.
    pub fn teardown_of(&mut self, key: &str) -> Option<Teardown> {
        let teardown = self.tearing_down.get(key)?;
        if teardown.peek().is_some() {
            self.tearing_down.remove(key);
            return None;
        }
        Some(teardown.clone())
    }

    /// Key of the least recently used resident model
    fn lru_candidate(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_tick)
            .map(|(key, _)| key.clone())
    }

    /// Evict resident models in LRU order until `needed` more bytes fit.
    ///
    /// Fails without evicting anything when the request could not fit even
    /// with every resident model gone.
    pub fn make_room(&mut self, key: &str, needed: u64) -> ServeResult<Evicted> {
        if self.reserved.saturating_add(needed) > self.budget {
            return Err(ServeError::InsufficientBudget {
                key: key.to_string(),
                required: needed,
                budget: self.budget.saturating_sub(self.reserved),
            });
        }

        let mut evicted = Vec::new();
        while self.charged + self.reserved + needed > self.budget {
            let Some(victim) = self.lru_candidate() else {
                break;
            };
            if let Some(entry) = self.remove(&victim) {
                warn!(
                    key = %victim,
                    freed = entry.footprint,
                    requested_by = %key,
                    "Evicting model from cache (LRU)"
                );
                evicted.push((victim, entry.handle));
            }
        }

        Ok(evicted)
    }

    /// Register an in-flight load and hold its footprint
    pub fn begin_load(&mut self, key: &str, future: InFlightLoad, reserved: u64) {
        self.reserved += reserved;
        self.loading
            .insert(key.to_string(), PendingLoad { future, reserved });
    }

    /// Settle an in-flight load: register the model on success, release the
    /// reservation either way. The returned handles need teardown.
    pub fn finish_load(
        &mut self,
        descriptor: &ModelDescriptor,
        handle: ServeResult<(ModelHandle, u64)>,
    ) -> (ServeResult<ModelHandle>, Evicted) {
        let key = descriptor.key.as_str();
        if let Some(pending) = self.loading.remove(key) {
            self.reserved = self.reserved.saturating_sub(pending.reserved);
        }

        let (handle, memory_bytes) = match handle {
            Ok(loaded) => loaded,
            Err(err) => return (Err(ServeError::loader(key, err)), Vec::new()),
        };
        let footprint = if memory_bytes == 0 {
            descriptor.memory_estimate
        } else {
            memory_bytes
        };

        let evicted = match self.make_room(key, footprint) {
            Ok(evicted) => evicted,
            Err(err) => return (Err(err), vec![(key.to_string(), handle)]),
        };

        let now = Utc::now();
        let tick = self.next_tick();
        self.charged += footprint;
        self.entries.insert(
            key.to_string(),
            LoadedModelEntry {
                handle: handle.clone(),
                footprint,
                last_used: now,
                last_tick: tick,
                loaded_at: now,
            },
        );

        (Ok(handle), evicted)
    }

    /// Remove a resident model and reclaim its charge
    pub fn remove(&mut self, key: &str) -> Option<LoadedModelEntry> {
        let entry = self.entries.remove(key)?;
        self.charged = self.charged.saturating_sub(entry.footprint);
        Some(entry)
    }

    /// Remove every resident model
    pub fn drain(&mut self) -> Evicted {
        self.charged = 0;
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.handle))
            .collect()
    }

    /// Status of one registered model
    pub fn status_of(&self, descriptor: &ModelDescriptor) -> ModelStatus {
        let entry = self.entries.get(&descriptor.key);
        ModelStatus {
            key: descriptor.key.clone(),
            resident: entry.is_some(),
            loading: self.loading.contains_key(&descriptor.key),
            memory_bytes: entry.map_or(0, |e| e.footprint),
            last_used: entry.map(|e| e.last_used),
            loaded_at: entry.map(|e| e.loaded_at),
            description: descriptor.description.clone(),
        }
    }
}
