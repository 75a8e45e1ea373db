//! Typed configuration for the client dispatcher and the ingestion server.
//!
//! Every struct deserializes from JSON with missing fields falling back to
//! [`Default`], so a config file only needs the values it changes.


use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::DEFAULT_MAX_CONNECTIONS;
use crate::error::{LogixError, Result};
use crate::transport::Credentials;

/// Environment override for [`StoreConfig::url`].
pub const ENV_STORE_URL: &str = "LOGIX_STORE_URL";
/// Environment override for [`ServerConfig::listen_addr`].
pub const ENV_LISTEN_ADDR: &str = "LOGIX_LISTEN_ADDR";

/// Bounds of the producer handle pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  pub min_idle: usize,
  pub max_idle: usize,
  pub max_total: usize,
  /// Longest a borrower waits for a handle before failing.
  pub max_wait_ms: u64,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      min_idle: 0,
      max_idle: 8,
      max_total: 30,
      max_wait_ms: 1_000,
    }
  }
}

/// Client-side dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
  /// Bus endpoint, `host:port`.
  pub bootstrap_servers: String,
  /// Capacity of each category channel.
  pub queue_capacity: usize,
  /// Largest batch handed to the transport.
  pub batch_size: usize,
  /// A non-empty channel is flushed at least this often.
  pub batch_timeout_ms: u64,
  /// Worker threads per category.
  pub worker_count: usize,
  /// Circuit breaker quiet period after a transport failure.
  pub quiet_period_secs: u64,
  pub credentials: Option<Credentials>,
  pub pool: PoolConfig,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      bootstrap_servers: String::new(),
      queue_capacity: 10_000,
      batch_size: 100,
      batch_timeout_ms: 500,
      worker_count: 1,
      quiet_period_secs: 30,
      credentials: None,
      pool: PoolConfig::default(),
    }
  }
}

impl DispatcherConfig {
  pub fn with_bootstrap_servers(servers: impl Into<String>) -> Self {
    Self {
      bootstrap_servers: servers.into(),
      ..Self::default()
    }
  }

  pub fn batch_timeout(&self) -> Duration {
    Duration::from_millis(self.batch_timeout_ms)
  }

  pub fn quiet_period(&self) -> Duration {
    Duration::from_secs(self.quiet_period_secs)
  }

  pub fn validate(&self) -> Result<()> {
    if self.queue_capacity == 0 {
      return Err(LogixError::Config("queue_capacity must be greater than 0".to_string()));
    }
    if self.batch_size == 0 {
      return Err(LogixError::Config("batch_size must be greater than 0".to_string()));
    }
    if self.worker_count == 0 {
      return Err(LogixError::Config("worker_count must be greater than 0".to_string()));
    }
    if self.pool.max_total == 0 {
      return Err(LogixError::Config("pool.max_total must be greater than 0".to_string()));
    }
    Ok(())
  }
}

/// Queue and batching settings of one server-side category lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
  pub queue_capacity: usize,
  pub batch_size: usize,
  /// Longest a writer waits for the first item of a batch.
  pub batch_timeout_ms: u64,
}

impl PipelineConfig {
  pub fn new(queue_capacity: usize, batch_size: usize, batch_timeout_ms: u64) -> Self {
    Self {
      queue_capacity,
      batch_size,
      batch_timeout_ms,
    }
  }

  pub fn run_log_default() -> Self {
    Self::new(10_000, 2_000, 5_000)
  }

  pub fn trace_log_default() -> Self {
    Self::new(5_000, 1_000, 10_000)
  }

  pub fn batch_timeout(&self) -> Duration {
    Duration::from_millis(self.batch_timeout_ms)
  }
}

/// Columnar store endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// HTTP endpoint, e.g. `http://localhost:8123`.
  pub url: String,
  pub database: String,
  pub username: Option<String>,
  pub password: Option<String>,
  pub connect_timeout_ms: u64,
  pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      url: "http://localhost:8123".to_string(),
      database: "logix".to_string(),
      username: None,
      password: None,
      connect_timeout_ms: 5_000,
      request_timeout_ms: 30_000,
    }
  }
}

/// Ingestion server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// Address the TCP bus listener binds to.
  pub listen_addr: String,
  /// Producer connections served at once; extra ones are closed on accept.
  pub max_connections: usize,
  /// Required from connecting producers when enabled.
  pub credentials: Option<Credentials>,
  /// Capacity of the in-process bus between listener and poller.
  pub bus_capacity: usize,
  pub max_poll_records: usize,
  pub poll_timeout_ms: u64,
  /// Bound on joining worker threads during shutdown.
  pub shutdown_timeout_ms: u64,
  #[serde(default = "PipelineConfig::run_log_default")]
  pub run_log: PipelineConfig,
  #[serde(default = "PipelineConfig::trace_log_default")]
  pub trace_log: PipelineConfig,
  pub store: StoreConfig,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen_addr: "0.0.0.0:9092".to_string(),
      max_connections: DEFAULT_MAX_CONNECTIONS,
      credentials: None,
      bus_capacity: 50_000,
      max_poll_records: 5_000,
      poll_timeout_ms: 1_000,
      shutdown_timeout_ms: 10_000,
      run_log: PipelineConfig::run_log_default(),
      trace_log: PipelineConfig::trace_log_default(),
      store: StoreConfig::default(),
    }
  }
}

impl ServerConfig {
  /// Read a JSON config file, then apply environment overrides.
  pub fn load(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
      LogixError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    let mut config: ServerConfig = serde_json::from_str(&raw)
      .map_err(|e| LogixError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
    config.apply_env();
    config.validate()?;
    Ok(config)
  }

  /// Defaults plus environment overrides, for running without a file.
  pub fn from_env() -> Result<Self> {
    let mut config = ServerConfig::default();
    config.apply_env();
    config.validate()?;
    Ok(config)
  }

  pub fn apply_env(&mut self) {
    if let Ok(url) = std::env::var(ENV_STORE_URL) {
      if !url.trim().is_empty() {
        self.store.url = url;
      }
    }
    if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
      if !addr.trim().is_empty() {
        self.listen_addr = addr;
      }
    }
  }

  pub fn validate(&self) -> Result<()> {
    for (name, lane) in [("run_log", &self.run_log), ("trace_log", &self.trace_log)] {
      if lane.queue_capacity == 0 || lane.batch_size == 0 {
        return Err(LogixError::Config(format!(
          "{}: queue_capacity and batch_size must be greater than 0",
          name
        )));
      }
    }
    if self.bus_capacity == 0 || self.max_poll_records == 0 {
      return Err(LogixError::Config(
        "bus_capacity and max_poll_records must be greater than 0".to_string(),
      ));
    }
    if self.max_connections == 0 {
      return Err(LogixError::Config(
        "max_connections must be greater than 0".to_string(),
      ));
    }
    Ok(())
  }

  pub fn poll_timeout(&self) -> Duration {
    Duration::from_millis(self.poll_timeout_ms)
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_millis(self.shutdown_timeout_ms)
  }
}
