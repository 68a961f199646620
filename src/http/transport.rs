//! Transport seam: the thing that actually puts bytes on the wire.
//!
//! The pipeline only ever sees [`Transport`], so tests script responses with
//! the mock below and production uses reqwest.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::ApiError;

use super::request::{ApiRequest, ApiResponse, Method};

/// Sends one request and returns the raw status + JSON body.
///
/// A transport-level failure (no HTTP response at all) is
/// `ApiError::Transport`; any response, whatever its status, is `Ok`.
/// Status-code policy belongs to the middleware, not here.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn send(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError>;
}

/// Production transport over reqwest.
pub struct ReqwestTransport {
  client: reqwest::Client,
  base: Url,
  version: String,
}

impl ReqwestTransport {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(config.timeout())
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    let base = Url::parse(&config.base_url)
      .map_err(|e| eyre!("Invalid base URL {}: {}", config.base_url, e))?;

    Ok(Self {
      client,
      base,
      version: config.version.clone(),
    })
  }

  fn endpoint(&self, req: &ApiRequest) -> Result<Url, ApiError> {
    let mut url = self
      .base
      .join(&format!("/api/{}{}", self.version, req.path))
      .map_err(|e| ApiError::Transport(format!("invalid request path {}: {}", req.path, e)))?;

    if !req.params.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (k, v) in &req.params {
        pairs.append_pair(k, v);
      }
    }

    Ok(url)
  }
}

#[async_trait]
impl Transport for ReqwestTransport {
  async fn send(&self, req: &ApiRequest) -> Result<ApiResponse, ApiError> {
    let url = self.endpoint(req)?;
    debug!(method = req.method.as_str(), url = %url, "sending request");

    let mut builder = match req.method {
      Method::Get => self.client.get(url),
      Method::Post => self.client.post(url),
      Method::Put => self.client.put(url),
      Method::Delete => self.client.delete(url),
    };

    if let Some(token) = &req.bearer {
      builder = builder.bearer_auth(token);
    }

    if let Some(body) = &req.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| ApiError::Transport(e.to_string()))?;

    let status = response.status().as_u16();
    let text = response
      .text()
      .await
      .map_err(|e| ApiError::Transport(e.to_string()))?;

    // Empty and non-JSON bodies are normalized to null; the envelope layer
    // falls back to a generic message for them.
    let body = if text.is_empty() {
      Value::Null
    } else {
      serde_json::from_str(&text).unwrap_or(Value::Null)
    };

    Ok(ApiResponse { status, body })
  }
}
