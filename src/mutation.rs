//! Generic optimistic-update engine.
//!
//! Every write operation gets the same contract: the UI sees the transformed
//! value immediately, and a failed write restores the exact pre-mutation
//! snapshot rather than a partial merge. Call sites supply a pure transform
//! and the write future; nothing else is hand-rolled per screen.
//!
//! Per-mutation state machine:
//! idle -> optimistic-applied -> {committed | rolled-back} -> settled.
//! No transition skips the optimistic apply; no transition re-enters idle.

use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::query::QueryCache;

/// Per-mutation knobs.
#[derive(Debug, Clone, Copy)]
pub struct MutateOptions {
  /// Invalidate the key once the mutation settles so the next read
  /// re-synchronizes with the server. On by default; opt out for keys the
  /// server never serves back (purely local aggregates).
  pub invalidate_on_settle: bool,
}

impl Default for MutateOptions {
  fn default() -> Self {
    Self {
      invalidate_on_settle: true,
    }
  }
}

/// Coordinates optimistic mutations over a query cache.
pub struct MutationCoordinator<C: QueryCache> {
  cache: Arc<C>,
}

impl<C: QueryCache> MutationCoordinator<C> {
  pub fn new(cache: Arc<C>) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &Arc<C> {
    &self.cache
  }

  /// Run a mutation with default options.
  pub async fn mutate<T, F, Fut>(
    &self,
    key: &str,
    variables: Value,
    transform: T,
    write: F,
  ) -> Result<Value, ApiError>
  where
    T: FnOnce(Option<&Value>, &Value) -> Value,
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    self
      .mutate_with(key, variables, transform, write, MutateOptions::default())
      .await
  }

  /// Run a mutation: cancel in-flight reads for the key, snapshot, apply the
  /// optimistic transform, perform the write, reconcile.
  ///
  /// The snapshot and optimistic apply happen before any suspension point,
  /// so this mutation's "previous value" cannot be torn by a concurrent
  /// task. Two mutations overlapping on the same key still layer: the
  /// second one's snapshot is whatever the first left behind, and its
  /// rollback restores that. That layering is deliberate; same-key
  /// mutations are not serialized here.
  pub async fn mutate_with<T, F, Fut>(
    &self,
    key: &str,
    variables: Value,
    transform: T,
    write: F,
    opts: MutateOptions,
  ) -> Result<Value, ApiError>
  where
    T: FnOnce(Option<&Value>, &Value) -> Value,
    F: FnOnce(Value) -> Fut,
    Fut: Future<Output = Result<Value, ApiError>>,
  {
    // A stale in-flight read must not clobber the optimistic value.
    self.cache.cancel_in_flight(key);

    let snapshot = self.cache.get(key);
    let optimistic = transform(snapshot.as_ref(), &variables);
    self.cache.set(key, optimistic);
    debug!(key, "optimistic value applied");

    let result = write(variables).await;

    match &result {
      Ok(_) => debug!(key, "mutation committed"),
      Err(err) => {
        warn!(key, error = %err, "mutation failed, rolling back");
        match snapshot {
          Some(previous) => self.cache.set(key, previous),
          None => self.cache.remove(key),
        }
      }
    }

    if opts.invalidate_on_settle {
      self.cache.invalidate(key);
    }
    debug!(key, "mutation settled");

    result
  }
}

impl<C: QueryCache> Clone for MutationCoordinator<C> {
  fn clone(&self) -> Self {
    Self {
      cache: Arc::clone(&self.cache),
    }
  }
}
