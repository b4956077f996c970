//! Transport seam between the resilient client and the network

use async_trait::async_trait;
use protserve_core::{ClientConfig, ServeError, ServeResult};
use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::debug;

/// A request as handed to the transport
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path relative to the service base URL, e.g. `/health`
    pub path: String,
    /// Optional JSON body
    pub body: Option<serde_json::Value>,
}

/// Status and body of a completed exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub status: u16,
    pub body: String,
}

impl ClientResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> ServeResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends one request attempt.
///
/// Any answer from the remote, whatever its status, is `Ok`; only failures to
/// complete the exchange are errors, reported as [`ServeError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> ServeResult<ClientResponse>;

    /// Where requests go, for logging
    fn endpoint(&self) -> &str;
}

/// HTTP transport over a pooled `reqwest` client
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for `base_url` keeping up to `pool_size` idle connections
    pub fn new(base_url: impl Into<String>, pool_size: usize) -> ServeResult<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_size)
            .build()
            .map_err(|e| ServeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a transport from the client configuration
    pub fn from_config(config: &ClientConfig) -> ServeResult<Self> {
        Self::new(config.base_url.clone(), config.pool_size)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> ServeResult<ClientResponse> {
        let url = self.url(&request.path);
        let mut builder = self.client.request(request.method.clone(), &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServeError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ServeError::Transport(format!("Failed to read response body: {}", e)))?;

        debug!(url = %url, status = status, size = body.len(), "Response received");
        Ok(ClientResponse { status, body })
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let transport = HttpTransport::new("http://localhost:8001/", 4).unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:8001");
        assert_eq!(transport.url("/health"), "http://localhost:8001/health");
        assert_eq!(transport.url("generate"), "http://localhost:8001/generate");
    }

    #[test]
    fn test_response_helpers() {
        let ok = ClientResponse {
            status: 204,
            body: String::new(),
        };
        assert!(ok.is_success());

        let redirect = ClientResponse {
            status: 302,
            body: String::new(),
        };
        assert!(!redirect.is_success());

        let json = ClientResponse {
            status: 200,
            body: r#"{"status":"healthy","models_loaded":2}"#.to_string(),
        };
        let value: serde_json::Value = json.json().unwrap();
        assert_eq!(value["models_loaded"], 2);

        let bad = ClientResponse {
            status: 200,
            body: "not json".to_string(),
        };
        assert!(matches!(
            bad.json::<serde_json::Value>(),
            Err(ServeError::Serialization(_))
        ));
    }
}
