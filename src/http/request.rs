//! Logical request/response model and the server's response envelope.

use serde_json::Value;

use crate::cache::fingerprint;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
  Get,
  Post,
  Put,
  Delete,
}

impl Method {
  /// Reads are idempotent and cacheable; only they take the offline path.
  pub fn is_read(&self) -> bool {
    matches!(self, Method::Get)
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
    }
  }
}

/// One logical HTTP operation as it moves through the middleware chain.
#[derive(Debug, Clone)]
pub struct ApiRequest {
  pub method: Method,
  /// Path relative to the versioned API root, e.g. "/products"
  pub path: String,
  pub params: Vec<(String, String)>,
  pub body: Option<Value>,
  /// Attached by the bearer middleware just before send.
  pub bearer: Option<String>,
  /// Set when the request is resubmitted after a token refresh. A 401 on a
  /// marked request is terminal: at most one auth retry per request.
  pub auth_retry: bool,
  /// Opts this request out of the 401 refresh protocol. Auth endpoints set
  /// this: a 401 from login means wrong credentials, not an expired session,
  /// and must surface verbatim.
  pub auth_exempt: bool,
}

impl ApiRequest {
  pub fn new(method: Method, path: &str) -> Self {
    Self {
      method,
      path: path.to_string(),
      params: Vec::new(),
      body: None,
      bearer: None,
      auth_retry: false,
      auth_exempt: false,
    }
  }

  pub fn get(path: &str) -> Self {
    Self::new(Method::Get, path)
  }

  pub fn post(path: &str) -> Self {
    Self::new(Method::Post, path)
  }

  pub fn put(path: &str) -> Self {
    Self::new(Method::Put, path)
  }

  pub fn delete(path: &str) -> Self {
    Self::new(Method::Delete, path)
  }

  pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
    self.params = params;
    self
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn auth_exempt(mut self) -> Self {
    self.auth_exempt = true;
    self
  }

  /// Persistent-cache key for this request.
  pub fn cache_key(&self) -> String {
    fingerprint(&self.path, &self.params)
  }
}

/// Raw outcome of a transport send: a status code and a parsed JSON body.
#[derive(Debug, Clone)]
pub struct ApiResponse {
  pub status: u16,
  pub body: Value,
}

impl ApiResponse {
  /// Unwrap the server envelope into a payload or a normalized error.
  ///
  /// Success bodies are wrapped `{data: T}`; error bodies carry
  /// `{error: {message}}`. A success body without the wrapper is passed
  /// through as-is.
  pub fn into_payload(self) -> Result<Value, ApiError> {
    if (200..300).contains(&self.status) {
      Ok(match self.body {
        Value::Object(mut map) if map.contains_key("data") => {
          map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
      })
    } else {
      Err(ApiError::Api {
        status: self.status,
        message: error_message(&self.body, self.status),
      })
    }
  }
}

/// Extract the human-readable message from the structured error envelope,
/// or fall back to a generic one.
fn error_message(body: &Value, status: u16) -> String {
  body
    .get("error")
    .and_then(|e| e.get("message"))
    .and_then(|m| m.as_str())
    .map(String::from)
    .unwrap_or_else(|| format!("request failed with status {}", status))
}
