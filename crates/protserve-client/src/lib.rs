//! protserve-client: Resilient access to the inference service
//!
//! This crate provides:
//! - A retrying HTTP client with bounded exponential backoff
//! - Per-client request metrics and health reports
//! - A remote model backend that loads and runs models through the client

pub mod client;
pub mod health;
pub mod metrics;
pub mod remote;
pub mod retry;
pub mod transport;

pub use client::ResilientClient;
pub use health::{HealthReport, HealthStatus};
pub use metrics::{ErrorRecord, MetricsSnapshot, RequestMetrics};
pub use remote::{RemoteLoader, RemoteModel};
pub use retry::RetryPolicy;
pub use transport::{ClientResponse, HttpTransport, OutboundRequest, Transport};

pub use reqwest::Method;
pub use tokio_util::sync::CancellationToken;
