//! Composition and execution of the middleware chain.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::refresh::RefreshGate;
use crate::auth::TokenStore;
use crate::cache::CacheStore;
use crate::error::ApiError;
use crate::net::NetworkStatus;

use super::middleware::{
  BearerAuth, Middleware, Next, OfflineFallback, RateLimitRetry, RefreshAuth,
};
use super::request::ApiRequest;
use super::transport::Transport;

/// Executes one logical HTTP operation through the policy chain.
pub struct RequestPipeline {
  transport: Arc<dyn Transport>,
  chain: Vec<Arc<dyn Middleware>>,
}

impl RequestPipeline {
  /// Compose a pipeline from an explicit chain. The first middleware is
  /// outermost; the transport is the terminal.
  pub fn new(transport: Arc<dyn Transport>, chain: Vec<Arc<dyn Middleware>>) -> Self {
    Self { transport, chain }
  }

  /// The standard policy order: offline fallback wraps everything so its
  /// write-through sees the final payload of any retry sequence; bearer
  /// attachment is innermost so every resubmit re-reads the token store.
  pub fn standard(
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenStore>,
    gate: Arc<RefreshGate>,
    cache: Arc<dyn CacheStore>,
    network: Arc<NetworkStatus>,
    rate_limit_retry: Duration,
  ) -> Self {
    let chain: Vec<Arc<dyn Middleware>> = vec![
      Arc::new(OfflineFallback::new(cache, network)),
      Arc::new(RefreshAuth::new(gate)),
      Arc::new(RateLimitRetry::new(rate_limit_retry)),
      Arc::new(BearerAuth::new(tokens)),
    ];

    Self::new(transport, chain)
  }

  pub async fn execute(&self, req: ApiRequest) -> Result<Value, ApiError> {
    Next::new(self.transport.as_ref(), &self.chain).run(req).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::auth::MemoryTokenStore;
  use crate::cache::SqliteStore;
  use crate::http::mock::{self, MockTransport};
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Harness {
    transport: Arc<MockTransport>,
    tokens: Arc<MemoryTokenStore>,
    cache: Arc<SqliteStore>,
    network: Arc<NetworkStatus>,
    pipeline: Arc<RequestPipeline>,
  }

  fn init_tracing() {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  }

  fn harness(tokens: MemoryTokenStore) -> Harness {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    let tokens = Arc::new(tokens);
    let cache = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = Arc::new(NetworkStatus::new());
    let gate = Arc::new(RefreshGate::new(
      tokens.clone(),
      transport.clone(),
      "/auth/refresh",
    ));

    let pipeline = Arc::new(RequestPipeline::standard(
      transport.clone(),
      tokens.clone(),
      gate,
      cache.clone(),
      network.clone(),
      Duration::from_millis(10),
    ));

    Harness {
      transport,
      tokens,
      cache,
      network,
      pipeline,
    }
  }

  fn route_refresh_ok(transport: &MockTransport) {
    transport.route_with_delay("/auth/refresh", Duration::from_millis(50), |_| {
      mock::ok(json!({
        "access_token": "acc-new",
        "refresh_token": "ref-new"
      }))
    });
  }

  /// Accepts only the refreshed token; everything else gets a 401.
  fn route_requires_new_token(transport: &MockTransport, path: &str, data: Value) {
    transport.route_with_delay(path, Duration::from_millis(5), move |req| {
      if req.bearer.as_deref() == Some("acc-new") {
        mock::ok(data.clone())
      } else {
        mock::status(401, "access token expired")
      }
    });
  }

  #[tokio::test]
  async fn bearer_token_is_attached_when_present() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.transport.route("/products", |req| {
      assert_eq!(req.bearer.as_deref(), Some("acc-1"));
      mock::ok(json!([]))
    });

    h.pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn missing_token_sends_unauthenticated() {
    let h = harness(MemoryTokenStore::new());
    h.transport.route("/products", |req| {
      assert_eq!(req.bearer, None);
      mock::ok(json!([]))
    });

    h.pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn five_concurrent_401s_trigger_exactly_one_refresh() {
    let h = harness(MemoryTokenStore::with_tokens("acc-old", "ref-old"));
    route_refresh_ok(&h.transport);
    route_requires_new_token(&h.transport, "/products", json!([{"id": 1}]));

    let results = futures::future::join_all(
      (0..5).map(|_| h.pipeline.execute(ApiRequest::get("/products"))),
    )
    .await;

    for result in results {
      assert_eq!(result.unwrap(), json!([{"id": 1}]));
    }

    assert_eq!(h.transport.calls_to("/auth/refresh"), 1);
    // Five initial attempts plus five retries with the refreshed token
    assert_eq!(h.transport.calls_to("/products"), 10);
  }

  #[tokio::test]
  async fn refresh_failure_is_terminal_and_clears_the_session() {
    let h = harness(MemoryTokenStore::with_tokens("acc-old", "ref-old"));
    h.transport
      .route("/auth/refresh", |_| mock::status(401, "refresh revoked"));
    h.transport
      .route("/products", |_| mock::status(401, "access token expired"));

    let err = h
      .pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap_err();
    assert_eq!(err, ApiError::SessionExpired);
    assert_eq!(h.tokens.access_token().await.unwrap(), None);

    // Next request goes out with no Authorization header at all.
    h.transport.route("/public", |req| {
      assert_eq!(req.bearer, None);
      mock::ok(json!({"open": true}))
    });
    h.pipeline
      .execute(ApiRequest::get("/public"))
      .await
      .unwrap();
  }

  #[tokio::test]
  async fn second_401_after_retry_is_terminal() {
    let h = harness(MemoryTokenStore::with_tokens("acc-old", "ref-old"));
    route_refresh_ok(&h.transport);
    // Rejects even the refreshed token
    h.transport
      .route("/products", |_| mock::status(401, "access token expired"));

    let err = h
      .pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap_err();

    assert_eq!(err, ApiError::SessionExpired);
    assert_eq!(h.transport.calls_to("/auth/refresh"), 1);
    assert_eq!(h.transport.calls_to("/products"), 2);
  }

  #[tokio::test]
  async fn rate_limited_request_is_resubmitted_after_the_interval() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));

    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    h.transport.route("/checkout", move |_| {
      if seen.fetch_add(1, Ordering::SeqCst) < 2 {
        mock::status(429, "too many requests")
      } else {
        mock::ok(json!({"receipt": 42}))
      }
    });

    let payload = h
      .pipeline
      .execute(ApiRequest::post("/checkout").with_body(json!({"items": []})))
      .await
      .unwrap();

    assert_eq!(payload, json!({"receipt": 42}));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn successful_reads_write_through_with_last_write_wins() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));

    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    h.transport.route("/products", move |_| {
      let n = seen.fetch_add(1, Ordering::SeqCst);
      mock::ok(json!([{"rev": n}]))
    });

    let req = || {
      ApiRequest::get("/products")
        .with_params(vec![("page".into(), "1".into()), ("q".into(), "kopi".into())])
    };

    h.pipeline.execute(req()).await.unwrap();
    h.pipeline.execute(req()).await.unwrap();

    let key = req().cache_key();
    assert_eq!(h.cache.get(&key).unwrap(), Some(json!([{"rev": 1}])));
  }

  #[tokio::test]
  async fn offline_read_is_served_from_cache_without_a_network_call() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.transport
      .route("/products", |_| mock::ok(json!([{"id": 1}])));

    // Prime the cache online with one param order...
    h.pipeline
      .execute(
        ApiRequest::get("/products")
          .with_params(vec![("a".into(), "1".into()), ("b".into(), "2".into())]),
      )
      .await
      .unwrap();
    let calls_before = h.transport.calls_to("/products");

    // ...then read offline with the other order.
    h.network.set_online(false);
    let payload = h
      .pipeline
      .execute(
        ApiRequest::get("/products")
          .with_params(vec![("b".into(), "2".into()), ("a".into(), "1".into())]),
      )
      .await
      .unwrap();

    assert_eq!(payload, json!([{"id": 1}]));
    assert_eq!(h.transport.calls_to("/products"), calls_before);
  }

  #[tokio::test]
  async fn offline_cache_miss_is_a_distinguishable_error() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.network.set_online(false);

    let err = h
      .pipeline
      .execute(ApiRequest::get("/customers"))
      .await
      .unwrap_err();

    assert_eq!(err, ApiError::OfflineNoData);
    assert_eq!(h.transport.calls_to("/customers"), 0);
  }

  #[tokio::test]
  async fn transport_error_falls_back_to_cached_payload() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));

    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    h.transport.route("/products", move |_| {
      if seen.fetch_add(1, Ordering::SeqCst) == 0 {
        mock::ok(json!([{"id": 1}]))
      } else {
        Err(ApiError::Transport("connection reset".to_string()))
      }
    });

    h.pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap();

    // Connectivity still reports online, but the wire drops the request.
    let payload = h
      .pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap();
    assert_eq!(payload, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn transport_error_with_no_cache_surfaces() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.transport
      .route("/products", |_| Err(ApiError::Transport("timed out".to_string())));

    let err = h
      .pipeline
      .execute(ApiRequest::get("/products"))
      .await
      .unwrap_err();
    assert_eq!(err, ApiError::Transport("timed out".to_string()));
  }

  /// Delegates reads but refuses every write.
  struct ReadOnlyCache(SqliteStore);

  impl crate::cache::CacheStore for ReadOnlyCache {
    fn get(&self, key: &str) -> color_eyre::Result<Option<Value>> {
      self.0.get(key)
    }

    fn set(&self, _key: &str, _payload: &Value) -> color_eyre::Result<()> {
      Err(color_eyre::eyre::eyre!("disk full"))
    }

    fn clear_prefix(&self, prefix: &str) -> color_eyre::Result<()> {
      self.0.clear_prefix(prefix)
    }

    fn stored_at(&self, key: &str) -> color_eyre::Result<Option<chrono::DateTime<chrono::Utc>>> {
      self.0.stored_at(key)
    }
  }

  #[tokio::test]
  async fn failed_write_through_does_not_fail_the_read() {
    init_tracing();
    let transport = Arc::new(MockTransport::new());
    transport.route("/products", |_| mock::ok(json!([{"id": 1}])));

    let tokens: Arc<MemoryTokenStore> = Arc::new(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    let cache = Arc::new(ReadOnlyCache(SqliteStore::open_in_memory().unwrap()));
    let gate = Arc::new(RefreshGate::new(
      tokens.clone(),
      transport.clone(),
      "/auth/refresh",
    ));

    let pipeline = RequestPipeline::standard(
      transport,
      tokens,
      gate,
      cache,
      Arc::new(NetworkStatus::new()),
      Duration::from_millis(10),
    );

    // The payload the server delivered wins over the storage hiccup.
    let payload = pipeline.execute(ApiRequest::get("/products")).await.unwrap();
    assert_eq!(payload, json!([{"id": 1}]));
  }

  #[tokio::test]
  async fn writes_are_never_served_from_cache() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.transport
      .route("/checkout", |_| Err(ApiError::Transport("offline".to_string())));

    // Even with the network flag down, writes go to the wire and surface
    // their failure.
    h.network.set_online(false);
    let err = h
      .pipeline
      .execute(ApiRequest::post("/checkout").with_body(json!({"items": [1]})))
      .await
      .unwrap_err();

    assert_eq!(err, ApiError::Transport("offline".to_string()));
    assert_eq!(h.transport.calls_to("/checkout"), 1);
  }

  #[tokio::test]
  async fn business_errors_surface_verbatim_without_retry() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.transport
      .route("/kasbon", |_| mock::status(422, "kasbon melebihi batas"));

    let err = h
      .pipeline
      .execute(ApiRequest::post("/kasbon").with_body(json!({"amount": 50000})))
      .await
      .unwrap_err();

    assert_eq!(err.to_string(), "kasbon melebihi batas");
    assert_eq!(err.status(), Some(422));
    assert_eq!(h.transport.calls_to("/kasbon"), 1);
  }

  #[tokio::test]
  async fn server_errors_are_not_retried() {
    let h = harness(MemoryTokenStore::with_tokens("acc-1", "ref-1"));
    h.transport
      .route("/reports", |_| mock::status(500, "internal error"));

    let err = h
      .pipeline
      .execute(ApiRequest::get("/reports"))
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(h.transport.calls_to("/reports"), 1);
  }
}
