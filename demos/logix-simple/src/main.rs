use std::sync::Arc;
use std::{thread, time::Duration};

use logix::config::DispatcherConfig;
use logix::dispatcher::{LogEventDispatcher, LogSink};
use logix::event::LogLevel;
use logix::id_gen::IdGenerator;
use logix::layer::LogixLayer;
use logix::trace_context::{EventBuilder, TraceContext};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> logix::Result<()> {
  // Start `logix-server serve` first; events are dropped while it is unreachable.
  let addr = std::env::var("LOGIX_BUS_ADDR").unwrap_or_else(|_| "127.0.0.1:9092".to_string());
  let dispatcher = Arc::new(LogEventDispatcher::new(
    DispatcherConfig::with_bootstrap_servers(addr),
  )?);
  let sink: Arc<dyn LogSink> = dispatcher.clone();

  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(LogixLayer::new(EventBuilder::new("logix-simple", "dev"), Arc::clone(&sink)))
    .with(EnvFilter::new("info"))
    .init();

  info!("application started");

  let ids = IdGenerator::new();
  let builder = Arc::new(EventBuilder::new("logix-simple", "dev"));
  for order in 1..=3 {
    let trace = TraceContext::start(&ids, Arc::clone(&builder), Arc::clone(&sink))?;
    handle_order(&trace, order);
    info!(trace_id = trace.trace_id(), order, "order handled");
  }

  simulate_concurrent_work(&ids, &builder, &sink)?;

  // Give the workers one batch timeout to flush before closing.
  thread::sleep(Duration::from_millis(800));
  let stats = dispatcher.stats();
  println!(
    "published={} sent={} dropped={} discarded={}",
    stats.published, stats.sent, stats.dropped, stats.discarded
  );
  dispatcher.close();
  Ok(())
}

fn handle_order(trace: &TraceContext, order: u32) {
  let _scope = trace.enter("OrderService.handle");
  trace.in_scope("InventoryService.reserve", || {
    trace.log(LogLevel::Info, format!("reserved stock for order {}", order));
    thread::sleep(Duration::from_millis(5));
  });
  trace.in_scope("PaymentService.charge", || {
    if order % 3 == 0 {
      warn!(trace_id = trace.trace_id(), order, "payment provider slow");
    }
    thread::sleep(Duration::from_millis(10));
  });
}

fn simulate_concurrent_work(
  ids: &IdGenerator,
  builder: &Arc<EventBuilder>,
  sink: &Arc<dyn LogSink>,
) -> logix::Result<()> {
  let trace = TraceContext::start(ids, Arc::clone(builder), Arc::clone(sink))?;
  let _root = trace.enter("BatchJob.run");

  let handles: Vec<_> = (0..4)
    .map(|worker| {
      let carrier = trace.child_carrier();
      thread::spawn(move || {
        carrier.in_scope(format!("BatchJob.worker{}", worker), || {
          for task in 0..5 {
            info!(trace_id = carrier.trace_id(), worker, task, "task done");
          }
        })
      })
    })
    .collect();

  for handle in handles {
    if handle.join().is_err() {
      error!("worker thread panicked");
    }
  }
  Ok(())
}
