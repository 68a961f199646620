//! Process-wide connectivity status.
//!
//! The platform's reachability listener flips this flag; the offline
//! fallback middleware consults it before issuing a read. The flag is only a
//! hint: a request issued while "online" can still fail at the transport
//! level, and that path falls back to cache independently.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct NetworkStatus {
  online: AtomicBool,
}

impl NetworkStatus {
  /// Assume online until the platform says otherwise.
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
    }
  }

  pub fn is_online(&self) -> bool {
    self.online.load(Ordering::Relaxed)
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::Relaxed);
  }
}

impl Default for NetworkStatus {
  fn default() -> Self {
    Self::new()
  }
}
