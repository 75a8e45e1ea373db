use std::sync::Arc;

use logix::bus::{MemoryBus, TcpBusListener};
use logix::config::ServerConfig;
use logix::consumer::ConsumerPipeline;
use logix::store::{HttpStoreClient, RunLogWriter, StoreClient, TraceLogWriter};
use logix::{LogixError, Result};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Run until SIGINT or SIGTERM, then stop intake before draining the writers.
pub fn run(config: ServerConfig) -> Result<()> {
  // Before startup, so a signal during bind is queued.
  let mut signals = Signals::new([SIGINT, SIGTERM])
    .map_err(|e| LogixError::Config(format!("cannot install signal handler: {}", e)))?;
  let store: Arc<dyn StoreClient> = Arc::new(HttpStoreClient::new(config.store.clone())?);
  let database = config.store.database.clone();

  let bus = MemoryBus::new(config.bus_capacity);
  let consumer = bus.consumer(config.max_poll_records);
  let mut listener = TcpBusListener::bind_with_limit(
    &config.listen_addr,
    config.credentials.clone(),
    bus,
    config.max_connections,
  )?;

  let mut pipeline = ConsumerPipeline::start(
    consumer,
    Arc::new(RunLogWriter::new(Arc::clone(&store), &database)),
    Arc::new(TraceLogWriter::new(store, &database)),
    &config,
  )?;

  tracing::info!(
    addr = %listener.local_addr(),
    store = %config.store.url,
    database = %database,
    auth = config.credentials.as_ref().is_some_and(|c| c.is_enabled()),
    "logix server started"
  );

  if let Some(signal) = signals.forever().next() {
    let name = if signal == SIGINT { "SIGINT" } else { "SIGTERM" };
    tracing::info!(signal = name, "shutdown requested");
  }

  listener.shutdown();
  pipeline.shutdown();

  let stats = pipeline.stats();
  tracing::info!(
    received = stats.received,
    written = stats.written,
    dropped = stats.dropped,
    parse_failed = stats.parse_failed,
    write_failed = stats.write_failed,
    "logix server stopped"
  );
  Ok(())
}
