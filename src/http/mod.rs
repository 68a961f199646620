//! The request pipeline: transport, policy middleware, and composition.
//!
//! Policies are explicit middleware composed in a fixed order (offline
//! fallback, 401 refresh, 429 backoff, bearer attachment) around a
//! [`Transport`] terminal, rather than interceptor callbacks whose ordering
//! depends on registration side effects.

mod middleware;
mod pipeline;
mod request;
mod transport;

pub use middleware::{BearerAuth, Middleware, Next, OfflineFallback, RateLimitRetry, RefreshAuth};
pub use pipeline::RequestPipeline;
pub use request::{ApiRequest, ApiResponse, Method};
pub use transport::{ReqwestTransport, Transport};

#[cfg(test)]
pub(crate) use transport::mock;
