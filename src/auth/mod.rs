//! Token storage.
//!
//! Pure storage, no policy: the refresh protocol lives in [`refresh`], the
//! 401 handling in the pipeline middleware. Storage I/O errors propagate to
//! the caller uninterpreted.

mod store;

pub mod refresh;

pub use store::{MemoryTokenStore, SqliteTokenStore, TokenStore};

use serde::Deserialize;

/// Access/refresh pair as returned by the login and refresh endpoints.
///
/// The two halves are only ever written together: a pair, or nothing.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenPair {
  pub access_token: String,
  pub refresh_token: String,
}
