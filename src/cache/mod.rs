//! Persistent response cache for offline support.
//!
//! Keyed by a deterministic fingerprint of (path, normalized params), one
//! row per fingerprint, last successful response wins. Survives process
//! restart so a cold start with no connectivity can still render the last
//! known data.

mod store;

pub use store::{fingerprint, CacheStore, SqliteStore};
