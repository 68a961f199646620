//! Resilient data-access core for the warung POS client.
//!
//! Everything the app sends over the network goes through this crate:
//! bearer-token attachment, single-flight token refresh on 401, fixed-delay
//! retry on 429, and an offline fallback that serves the last successful
//! response from a persistent cache when connectivity is absent or flaky.
//! Writes get a generic optimistic-update/rollback contract via
//! [`MutationCoordinator`] so screens never hand-roll snapshot/restore logic.
//!
//! Domain payloads (products, customers, transactions, kasbon) are opaque
//! `serde_json::Value`s here; business rules live in the callers.

pub mod auth;
pub mod cache;
mod client;
pub mod config;
mod error;
pub mod http;
mod mutation;
mod net;
mod query;

pub use client::ApiClient;
pub use config::Config;
pub use error::ApiError;
pub use mutation::{MutateOptions, MutationCoordinator};
pub use net::NetworkStatus;
pub use query::{MemoryQueryCache, QueryCache};
