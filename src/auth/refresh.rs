//! Single-flight token refresh.
//!
//! Any number of requests can hit a 401 at the same time; exactly one
//! refresh call may be in flight system-wide. The first 401 performs the
//! refresh, everyone else queues on the gate and resumes with the same
//! outcome once it settles.

use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::http::{ApiRequest, Transport};

use super::{TokenPair, TokenStore};

type RefreshOutcome = Result<String, ApiError>;

/// Transient refresh state: the in-flight flag and the waiters queued
/// behind the current refresh. Waiters are drained the moment the refresh
/// settles, success or failure.
#[derive(Default)]
struct RefreshState {
  in_flight: bool,
  waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

pub struct RefreshGate {
  tokens: Arc<dyn TokenStore>,
  transport: Arc<dyn Transport>,
  refresh_path: String,
  state: Mutex<RefreshState>,
}

impl RefreshGate {
  pub fn new(tokens: Arc<dyn TokenStore>, transport: Arc<dyn Transport>, refresh_path: &str) -> Self {
    Self {
      tokens,
      transport,
      refresh_path: refresh_path.to_string(),
      state: Mutex::new(RefreshState::default()),
    }
  }

  /// Obtain a fresh access token, sharing one refresh call among all
  /// concurrent callers.
  ///
  /// On failure the stored pair is cleared and every caller gets
  /// `ApiError::SessionExpired`: the session is dead and the UI layer is
  /// expected to force a logout.
  pub async fn refresh(&self) -> RefreshOutcome {
    // Decide under the lock, then release it before any await.
    let waiter = {
      let mut state = self.lock_state()?;
      if state.in_flight {
        let (tx, rx) = oneshot::channel();
        state.waiters.push(tx);
        Some(rx)
      } else {
        state.in_flight = true;
        None
      }
    };

    if let Some(rx) = waiter {
      debug!("refresh already in flight, waiting on it");
      // A dropped sender means the refreshing task died; treat as terminal.
      return rx.await.unwrap_or(Err(ApiError::SessionExpired));
    }

    let result = self.perform_refresh().await;

    let waiters = {
      let mut state = self.lock_state()?;
      state.in_flight = false;
      std::mem::take(&mut state.waiters)
    };

    debug!(waiters = waiters.len(), ok = result.is_ok(), "refresh settled");
    for tx in waiters {
      let _ = tx.send(result.clone());
    }

    result
  }

  async fn perform_refresh(&self) -> RefreshOutcome {
    let refresh_token = self
      .tokens
      .refresh_token()
      .await
      .map_err(ApiError::storage)?;

    let Some(refresh_token) = refresh_token else {
      warn!("no refresh token stored, session is dead");
      return Err(ApiError::SessionExpired);
    };

    // Sent directly against the transport: if the refresh call itself went
    // through the middleware chain, a 401 here would recurse into the gate.
    let req = ApiRequest::post(&self.refresh_path)
      .with_body(json!({ "refresh_token": refresh_token }));

    let payload = match self.transport.send(&req).await {
      Ok(resp) => resp.into_payload(),
      Err(err) => Err(err),
    };

    let pair = payload.and_then(|p| {
      serde_json::from_value::<TokenPair>(p).map_err(|e| ApiError::Api {
        status: 200,
        message: format!("malformed refresh response: {}", e),
      })
    });

    match pair {
      Ok(pair) => {
        self
          .tokens
          .set_tokens(&pair.access_token, &pair.refresh_token)
          .await
          .map_err(ApiError::storage)?;
        debug!("token refresh succeeded");
        Ok(pair.access_token)
      }
      Err(err) => {
        warn!(error = %err, "token refresh failed, clearing session");
        if let Err(e) = self.tokens.clear_tokens().await {
          warn!(error = %e, "failed to clear tokens after refresh failure");
        }
        Err(ApiError::SessionExpired)
      }
    }
  }

  fn lock_state(&self) -> Result<MutexGuard<'_, RefreshState>, ApiError> {
    self
      .state
      .lock()
      .map_err(|e| ApiError::Storage(format!("refresh state lock poisoned: {}", e)))
  }
}
