//! Client facade wiring the pipeline, stores, and session lifecycle.

use color_eyre::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::auth::refresh::RefreshGate;
use crate::auth::{SqliteTokenStore, TokenPair, TokenStore};
use crate::cache::{CacheStore, SqliteStore};
use crate::config::{ApiConfig, Config};
use crate::error::ApiError;
use crate::http::{ApiRequest, ReqwestTransport, RequestPipeline, Transport};
use crate::net::NetworkStatus;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";

/// The one client every store and screen talks through.
///
/// Domain payloads are opaque JSON; this type only owns transport policy and
/// the session lifecycle (login, refresh-on-401, logout).
pub struct ApiClient {
  pipeline: RequestPipeline,
  tokens: Arc<dyn TokenStore>,
  cache: Arc<dyn CacheStore>,
  network: Arc<NetworkStatus>,
}

impl ApiClient {
  /// Wire the production stack: reqwest transport, SQLite token and
  /// response stores.
  pub fn new(config: &Config) -> Result<Self> {
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(&config.api)?);
    let tokens: Arc<dyn TokenStore> = Arc::new(SqliteTokenStore::open()?);
    let cache: Arc<dyn CacheStore> = Arc::new(SqliteStore::open()?);
    let network = Arc::new(NetworkStatus::new());

    Ok(Self::with_parts(transport, tokens, cache, network, &config.api))
  }

  /// Assemble from explicit parts. Tests inject a scripted transport and
  /// in-memory stores here.
  pub fn with_parts(
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    cache: Arc<dyn CacheStore>,
    network: Arc<NetworkStatus>,
    api: &ApiConfig,
  ) -> Self {
    let gate = Arc::new(RefreshGate::new(
      tokens.clone(),
      transport.clone(),
      REFRESH_PATH,
    ));

    let pipeline = RequestPipeline::standard(
      transport,
      tokens.clone(),
      gate,
      cache.clone(),
      network.clone(),
      api.rate_limit_retry(),
    );

    Self {
      pipeline,
      tokens,
      cache,
      network,
    }
  }

  /// Connectivity flag the platform's reachability listener should flip.
  pub fn network(&self) -> &Arc<NetworkStatus> {
    &self.network
  }

  pub async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<Value, ApiError> {
    let params = params
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect();
    self
      .pipeline
      .execute(ApiRequest::get(path).with_params(params))
      .await
  }

  pub async fn post(&self, path: &str, body: Value) -> Result<Value, ApiError> {
    self
      .pipeline
      .execute(ApiRequest::post(path).with_body(body))
      .await
  }

  pub async fn put(&self, path: &str, body: Value) -> Result<Value, ApiError> {
    self
      .pipeline
      .execute(ApiRequest::put(path).with_body(body))
      .await
  }

  pub async fn delete(&self, path: &str) -> Result<Value, ApiError> {
    self.pipeline.execute(ApiRequest::delete(path)).await
  }

  /// Drop every cached response under a path prefix. Call after deleting a
  /// domain object so stale list/detail caches cannot resurrect it.
  pub fn evict_prefix(&self, prefix: &str) -> Result<(), ApiError> {
    debug!(prefix, "evicting cached responses");
    self.cache.clear_prefix(prefix).map_err(ApiError::storage)
  }

  /// Authenticate and persist the returned token pair atomically.
  ///
  /// The login request is exempt from the refresh protocol: a 401 here is a
  /// credential error, not an expired session.
  pub async fn login(&self, credentials: Value) -> Result<Value, ApiError> {
    let payload = self
      .pipeline
      .execute(
        ApiRequest::post(LOGIN_PATH)
          .with_body(credentials)
          .auth_exempt(),
      )
      .await?;

    let pair: TokenPair = serde_json::from_value(payload.clone()).map_err(|e| ApiError::Api {
      status: 200,
      message: format!("malformed login response: {}", e),
    })?;

    self
      .tokens
      .set_tokens(&pair.access_token, &pair.refresh_token)
      .await
      .map_err(ApiError::storage)?;

    Ok(payload)
  }

  /// Clear the stored session.
  pub async fn logout(&self) -> Result<(), ApiError> {
    self.tokens.clear_tokens().await.map_err(ApiError::storage)
  }
}
