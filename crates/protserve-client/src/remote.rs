//! Remote model backend
//!
//! Models live in the inference service; the loader asks it to load and
//! unload them and the handles forward inference calls over the resilient
//! client.

use async_trait::async_trait;
use protserve_core::{
    GenerateOutput, GenerateRequest, LoadedModel, Loader, Model, ModelDescriptor, ModelHandle,
    OptimizeOutput, OptimizeRequest, ServeError, ServeResult,
};
use reqwest::Method;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::client::ResilientClient;

/// Body of a load acknowledgement. Services that report the resident size
/// let the cache charge it instead of the estimate.
#[derive(Debug, Default, Deserialize)]
struct LoadAck {
    #[serde(default)]
    memory_bytes: u64,
}

/// Loader backed by the inference service
pub struct RemoteLoader {
    client: Arc<ResilientClient>,
}

impl RemoteLoader {
    pub fn new(client: Arc<ResilientClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Loader for RemoteLoader {
    async fn load(&self, descriptor: &ModelDescriptor) -> ServeResult<LoadedModel> {
        let path = format!("/models/{}/load", descriptor.key);
        let response = self.client.execute(Method::POST, &path, None).await?;
        let ack = if response.body.trim().is_empty() {
            LoadAck::default()
        } else {
            response.json::<LoadAck>().unwrap_or_else(|e| {
                warn!(
                    key = %descriptor.key,
                    error = %e,
                    "Load acknowledgement not understood, charging the estimate"
                );
                LoadAck::default()
            })
        };

        info!(
            key = %descriptor.key,
            endpoint = self.client.endpoint(),
            reported_bytes = ack.memory_bytes,
            "Remote model loaded"
        );

        let handle: ModelHandle = Arc::new(RemoteModel {
            key: descriptor.key.clone(),
            client: Arc::clone(&self.client),
        });
        Ok(LoadedModel::with_memory(handle, ack.memory_bytes))
    }

    async fn unload(&self, key: &str, _handle: ModelHandle) -> ServeResult<()> {
        let path = format!("/models/{}/unload", key);
        self.client.execute(Method::POST, &path, None).await?;
        debug!(key = key, "Remote model unloaded");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

/// Handle to a model resident in the inference service
pub struct RemoteModel {
    key: String,
    client: Arc<ResilientClient>,
}

impl RemoteModel {
    fn body_with_model<T: serde::Serialize>(&self, request: &T) -> ServeResult<serde_json::Value> {
        let mut body = serde_json::to_value(request)?;
        match body.as_object_mut() {
            Some(fields) => {
                fields.insert("model".to_string(), serde_json::Value::String(self.key.clone()));
                Ok(body)
            }
            None => Err(ServeError::Serialization(
                "request did not serialize to an object".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Model for RemoteModel {
    fn key(&self) -> &str {
        &self.key
    }

    async fn generate(&self, request: &GenerateRequest) -> ServeResult<GenerateOutput> {
        let body = self.body_with_model(request)?;
        let response = self
            .client
            .execute(Method::POST, "/generate", Some(body))
            .await?;
        response.json()
    }

    async fn optimize(&self, request: &OptimizeRequest) -> ServeResult<OptimizeOutput> {
        let body = self.body_with_model(request)?;
        let response = self
            .client
            .execute(Method::POST, "/optimize", Some(body))
            .await?;
        response.json()
    }
}
