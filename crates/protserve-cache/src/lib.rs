//! protserve-cache: Memory-bounded model cache
//!
//! This crate keeps expensive models resident under a hard memory budget:
//! - LRU eviction of resident models
//! - Load de-duplication per model key
//! - Residency status and budget statistics

pub mod cache;
mod state;

pub use cache::{CacheStats, ModelCache};
