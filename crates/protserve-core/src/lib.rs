//! protserve-core: Core types and traits for protserve
//!
//! This crate provides the fundamental types shared by the cache and the client:
//! - Model descriptors and the model registry
//! - The `Model` and `Loader` capability traits
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod model;
pub mod traits;

pub use self::config::*;
pub use error::*;
pub use model::*;
pub use traits::*;
