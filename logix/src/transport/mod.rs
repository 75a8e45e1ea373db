//! Message bus seams.
//!
//! The bus itself is an external collaborator. Producers and consumers are
//! reached through the traits below; [`crate::bus`] provides the in-process
//! broker and the TCP transport that implement them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Topic carrying run log payloads.
pub const RUN_TOPIC: &str = "logix-run-logs";
/// Topic carrying trace log payloads.
pub const TRACE_TOPIC: &str = "logix-trace-logs";

/// One message as delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusRecord {
  pub topic: String,
  pub payload: String,
}

impl BusRecord {
  pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
    Self {
      topic: topic.into(),
      payload: payload.into(),
    }
  }
}

/// SASL-style username/password pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
  pub username: String,
  pub password: String,
}

impl Credentials {
  pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
    Self {
      username: username.into(),
      password: password.into(),
    }
  }

  /// Authentication is only used when both parts are non-blank.
  pub fn is_enabled(&self) -> bool {
    !self.username.trim().is_empty() && !self.password.trim().is_empty()
  }
}

/// A producer handle. Handles are owned by one borrower at a time.
pub trait BusProducer: Send {
  /// Send a single payload to `topic`.
  fn send(&mut self, topic: &str, payload: &str) -> Result<()>;

  /// Push anything buffered by the handle onto the wire.
  fn flush(&mut self) -> Result<()> {
    Ok(())
  }

  /// Cheap liveness check used by the pool before lending the handle out.
  fn is_healthy(&self) -> bool {
    true
  }
}

/// Polling side of the bus.
pub trait BusConsumer: Send {
  /// Wait up to `timeout` for records. An empty vec means nothing arrived.
  fn poll(&mut self, timeout: Duration) -> Result<Vec<BusRecord>>;
}

/// Lifecycle hooks for pooled producer handles.
pub trait TransportFactory: Send + Sync + 'static {
  type Handle: BusProducer;

  /// Build a new handle (opens the underlying connection).
  fn create(&self) -> Result<Self::Handle>;

  /// Whether an idle handle may be lent out again.
  fn validate(&self, handle: &Self::Handle) -> bool {
    handle.is_healthy()
  }

  /// Release the handle's network resources.
  fn destroy(&self, handle: Self::Handle) {
    drop(handle);
  }
}
