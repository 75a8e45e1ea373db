use thiserror::Error;

/// Errors surfaced by the logix library.
///
/// Ingestion workers never propagate these out of their loops; they are logged
/// and the loop continues. Only query calls and id generation hand them back to
/// the caller.
#[derive(Debug, Error)]
pub enum LogixError {
  #[error("transport pool exhausted after waiting {waited_ms}ms")]
  PoolExhausted { waited_ms: u64 },

  #[error("transport failure: {0}")]
  Transport(String),

  #[error("authentication failed: {0}")]
  Authentication(String),

  #[error("clock moved backwards: last={last}ms current={current}ms, refusing to generate id")]
  ClockMovedBackwards { last: i64, current: i64 },

  #[error("serialization error: {0}")]
  Serialization(String),

  #[error("store write failed: {0}")]
  Store(String),

  #[error("query failed: {0}")]
  Query(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for LogixError {
  fn from(e: serde_json::Error) -> Self {
    LogixError::Serialization(e.to_string())
  }
}

impl From<serde_cbor::Error> for LogixError {
  fn from(e: serde_cbor::Error) -> Self {
    LogixError::Serialization(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, LogixError>;
