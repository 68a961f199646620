//! Client-side query cache abstraction.
//!
//! The mutation coordinator is generic over [`QueryCache`]; screens usually
//! bring their own (per-view) cache, but [`MemoryQueryCache`] is a complete
//! in-process implementation that callers and tests can use directly.
//!
//! Cancellation works through generation counters: a reader captures the
//! key's generation before fetching and commits with [`MemoryQueryCache::
//! set_if_current`]. `cancel_in_flight` and `invalidate` bump the
//! generation, so a late response from a cancelled or superseded read is
//! discarded instead of clobbering newer state.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// The cache surface the mutation coordinator needs.
pub trait QueryCache: Send + Sync {
  fn get(&self, key: &str) -> Option<Value>;

  fn set(&self, key: &str, value: Value);

  /// Remove the entry entirely. Used when rolling back a mutation whose key
  /// had no pre-mutation value.
  fn remove(&self, key: &str);

  /// Mark the entry stale so the next read re-synchronizes with the server.
  /// The cached value stays readable in the meantime.
  fn invalidate(&self, key: &str);

  /// Abandon any in-flight read for the key: its response must not land in
  /// the cache when it arrives.
  fn cancel_in_flight(&self, key: &str);
}

struct Entry {
  value: Value,
  stale: bool,
}

#[derive(Default)]
struct Inner {
  entries: HashMap<String, Entry>,
  generations: HashMap<String, u64>,
}

/// In-memory query cache with generation-based cancellation.
#[derive(Default)]
pub struct MemoryQueryCache {
  inner: Mutex<Inner>,
}

impl MemoryQueryCache {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    // A poisoned lock still holds coherent data; recover it.
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// Current generation for a key. Capture this before starting a read.
  pub fn generation(&self, key: &str) -> u64 {
    *self.lock().generations.get(key).unwrap_or(&0)
  }

  /// Store a fetched value only if the generation captured at fetch start is
  /// still current. Returns whether the write landed.
  pub fn set_if_current(&self, key: &str, generation: u64, value: Value) -> bool {
    let mut inner = self.lock();
    if *inner.generations.get(key).unwrap_or(&0) != generation {
      return false;
    }
    inner.entries.insert(
      key.to_string(),
      Entry {
        value,
        stale: false,
      },
    );
    true
  }

  /// Whether the entry was invalidated since it was last set.
  pub fn is_stale(&self, key: &str) -> bool {
    self.lock().entries.get(key).map(|e| e.stale).unwrap_or(true)
  }

  fn bump(inner: &mut Inner, key: &str) {
    *inner.generations.entry(key.to_string()).or_insert(0) += 1;
  }
}

impl QueryCache for MemoryQueryCache {
  fn get(&self, key: &str) -> Option<Value> {
    self.lock().entries.get(key).map(|e| e.value.clone())
  }

  fn set(&self, key: &str, value: Value) {
    self.lock().entries.insert(
      key.to_string(),
      Entry {
        value,
        stale: false,
      },
    );
  }

  fn remove(&self, key: &str) {
    let mut inner = self.lock();
    inner.entries.remove(key);
    Self::bump(&mut inner, key);
  }

  fn invalidate(&self, key: &str) {
    let mut inner = self.lock();
    if let Some(entry) = inner.entries.get_mut(key) {
      entry.stale = true;
    }
    Self::bump(&mut inner, key);
  }

  fn cancel_in_flight(&self, key: &str) {
    let mut inner = self.lock();
    Self::bump(&mut inner, key);
  }
}
