//! Error taxonomy for the data-access core.
//!
//! Every failure surfaces as one [`ApiError`] whose `Display` is a
//! human-readable message, so the UI can render a generic failure toast
//! without matching on kinds. Callers that do care (forced logout, offline
//! banners) match on the variant.

use thiserror::Error;

/// Normalized error for all pipeline operations.
///
/// All variants carry owned strings so the error is `Clone`; a refresh
/// failure is fanned out to every waiter queued behind the in-flight refresh.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
  /// No HTTP response was received at all (DNS, connect, timeout).
  #[error("network error: {0}")]
  Transport(String),

  /// Offline and the persistent cache has nothing for this request.
  #[error("offline and no cached data available")]
  OfflineNoData,

  /// The session is dead: refresh failed or a retried request got a second
  /// 401. The UI layer is expected to force a logout on this.
  #[error("session expired, please log in again")]
  SessionExpired,

  /// The server answered with a non-success status. `message` comes from the
  /// `{error: {message}}` envelope when present.
  #[error("{message}")]
  Api { status: u16, message: String },

  /// Durable storage failed underneath the pipeline.
  #[error("storage error: {0}")]
  Storage(String),
}

impl ApiError {
  /// Wrap a storage-layer error, preserving its message.
  pub fn storage(err: color_eyre::Report) -> Self {
    ApiError::Storage(err.to_string())
  }

  /// Status code of the server response, if there was one.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Api { status, .. } => Some(*status),
      _ => None,
    }
  }
}
