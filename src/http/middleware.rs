//! Policy middleware around the transport.
//!
//! Each middleware owns exactly one policy and sees the rest of the chain
//! as an opaque [`Next`]. Status-code handling is expressed as
//! match-on-error-and-resubmit over [`ApiError`] variants, which keeps the
//! retry logic out of the transport.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::refresh::RefreshGate;
use crate::auth::TokenStore;
use crate::cache::CacheStore;
use crate::error::ApiError;
use crate::net::NetworkStatus;

use super::request::ApiRequest;
use super::transport::Transport;

#[async_trait]
pub trait Middleware: Send + Sync {
  async fn handle(&self, req: ApiRequest, next: Next<'_>) -> Result<Value, ApiError>;
}

/// The remainder of the chain, ending in the transport terminal.
///
/// `Copy`, so a middleware can run it more than once to resubmit a request.
#[derive(Clone, Copy)]
pub struct Next<'a> {
  transport: &'a dyn Transport,
  chain: &'a [Arc<dyn Middleware>],
}

impl<'a> Next<'a> {
  pub(crate) fn new(transport: &'a dyn Transport, chain: &'a [Arc<dyn Middleware>]) -> Self {
    Self { transport, chain }
  }

  pub async fn run(self, req: ApiRequest) -> Result<Value, ApiError> {
    match self.chain.split_first() {
      Some((mw, rest)) => {
        let next = Next {
          transport: self.transport,
          chain: rest,
        };
        mw.handle(req, next).await
      }
      None => {
        let resp = self.transport.send(&req).await?;
        resp.into_payload()
      }
    }
  }
}

/// Innermost middleware: reads the access token and attaches it as a bearer
/// credential. Re-reads on every (re)submit, so a retry after refresh picks
/// up the new token. Absent token means the request goes unauthenticated;
/// some endpoints are public.
pub struct BearerAuth {
  tokens: Arc<dyn TokenStore>,
}

impl BearerAuth {
  pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
    Self { tokens }
  }
}

#[async_trait]
impl Middleware for BearerAuth {
  async fn handle(&self, mut req: ApiRequest, next: Next<'_>) -> Result<Value, ApiError> {
    req.bearer = self
      .tokens
      .access_token()
      .await
      .map_err(ApiError::storage)?;
    next.run(req).await
  }
}

/// 401 handling: refresh the session through the single-flight gate and
/// resubmit once. A 401 on the resubmitted request is terminal.
///
/// Requests marked `auth_exempt` (the auth endpoints themselves) skip the
/// protocol entirely; their 401s are credential errors and surface verbatim.
pub struct RefreshAuth {
  gate: Arc<RefreshGate>,
}

impl RefreshAuth {
  pub fn new(gate: Arc<RefreshGate>) -> Self {
    Self { gate }
  }
}

#[async_trait]
impl Middleware for RefreshAuth {
  async fn handle(&self, req: ApiRequest, next: Next<'_>) -> Result<Value, ApiError> {
    let original = (!req.auth_retry && !req.auth_exempt).then(|| req.clone());
    let result = next.run(req).await;

    match (result, original) {
      (Err(ApiError::Api { status: 401, .. }), Some(mut retry)) => {
        debug!(path = %retry.path, "401 received, refreshing session");
        self.gate.refresh().await?;

        retry.auth_retry = true;
        match next.run(retry).await {
          // The refreshed token was rejected too; the session is dead.
          Err(ApiError::Api { status: 401, .. }) => Err(ApiError::SessionExpired),
          other => other,
        }
      }
      (result, _) => result,
    }
  }
}

/// 429 handling: wait a fixed interval and resubmit the same request.
///
/// No retry ceiling is enforced; we rely on the server eventually admitting
/// the request. A max-retry cap would be a reasonable hardening addition.
pub struct RateLimitRetry {
  interval: Duration,
}

impl RateLimitRetry {
  pub fn new(interval: Duration) -> Self {
    Self { interval }
  }
}

#[async_trait]
impl Middleware for RateLimitRetry {
  async fn handle(&self, req: ApiRequest, next: Next<'_>) -> Result<Value, ApiError> {
    loop {
      match next.run(req.clone()).await {
        Err(ApiError::Api { status: 429, .. }) => {
          debug!(path = %req.path, interval_ms = self.interval.as_millis() as u64, "rate limited, backing off");
          tokio::time::sleep(self.interval).await;
        }
        other => return other,
      }
    }
  }
}

/// Outermost middleware: cache policy for reads.
///
/// Offline reads are served from the persistent cache or fail with
/// [`ApiError::OfflineNoData`]. Online reads write through on success, and a
/// transport-level failure (no HTTP response) degrades to the cached payload
/// when one exists. Writes never touch this path.
pub struct OfflineFallback {
  cache: Arc<dyn CacheStore>,
  network: Arc<NetworkStatus>,
}

impl OfflineFallback {
  pub fn new(cache: Arc<dyn CacheStore>, network: Arc<NetworkStatus>) -> Self {
    Self { cache, network }
  }
}

#[async_trait]
impl Middleware for OfflineFallback {
  async fn handle(&self, req: ApiRequest, next: Next<'_>) -> Result<Value, ApiError> {
    if !req.method.is_read() {
      return next.run(req).await;
    }

    let key = req.cache_key();

    if !self.network.is_online() {
      debug!(key = %key, "offline, consulting cache");
      return match self.cache.get(&key).map_err(ApiError::storage)? {
        Some(payload) => Ok(payload),
        None => Err(ApiError::OfflineNoData),
      };
    }

    match next.run(req).await {
      Ok(payload) => {
        // The server already delivered; a failed write-through only costs
        // the next offline read, so log it instead of failing the request.
        if let Err(err) = self.cache.set(&key, &payload) {
          warn!(key = %key, error = %err, "write-through failed");
        }
        Ok(payload)
      }
      Err(ApiError::Transport(err)) => {
        match self.cache.get(&key).map_err(ApiError::storage)? {
          Some(payload) => {
            warn!(key = %key, error = %err, "transport failed, serving cached payload");
            Ok(payload)
          }
          None => Err(ApiError::Transport(err)),
        }
      }
      Err(other) => Err(other),
    }
  }
}
