#[cfg(test)]
mod __test__ {
  use crate::dispatcher::LogSink;
  use crate::error::LogixError;
  use crate::event::{LogEvent, LogLevel, TracePosition};
  use crate::id_gen::{parse_timestamp, IdGenerator, ManualClock, EPOCH};
  use crate::trace_context::{package_message, EventBuilder, TraceContext};
  use std::sync::{Arc, Mutex};
  use std::thread;

  #[derive(Default)]
  struct Collect {
    events: Mutex<Vec<LogEvent>>,
  }

  impl LogSink for Collect {
    fn submit(&self, event: LogEvent) -> bool {
      self.events.lock().unwrap().push(event);
      true
    }
  }

  fn builder() -> Arc<EventBuilder> {
    Arc::new(EventBuilder::new("orders", "prod").with_server_ip("10.0.0.5"))
  }

  fn trace_rows(sink: &Collect) -> Vec<(String, TracePosition, u32)> {
    sink
      .events
      .lock()
      .unwrap()
      .iter()
      .filter_map(|e| match e {
        LogEvent::Trace(t) => Some((t.header.method_name.clone(), t.position, t.depth)),
        LogEvent::Run(_) => None,
      })
      .collect()
  }

  #[test]
  fn test_nested_scopes_increment_depth_on_entry_and_exit() {
    let sink = Arc::new(Collect::default());
    let ctx = TraceContext::resume("ABC123", builder(), sink.clone()).unwrap();

    ctx.in_scope("OrderService.place", || {
      let _inner = ctx.enter("StockService.reserve");
    });

    assert_eq!(
      trace_rows(&sink),
      vec![
        ("OrderService.place".to_string(), TracePosition::Start, 1),
        ("StockService.reserve".to_string(), TracePosition::Start, 2),
        ("StockService.reserve".to_string(), TracePosition::End, 3),
        ("OrderService.place".to_string(), TracePosition::End, 4),
      ]
    );
    let events = sink.events.lock().unwrap();
    let header = events[0].header();
    assert_eq!(header.trace_id.as_deref(), Some("ABC123"));
    assert_eq!(header.app_name, "orders");
    assert_eq!(header.env, "prod");
    assert_eq!(header.server_ip, "10.0.0.5");
  }

  #[test]
  fn test_start_uses_generated_trace_id() {
    let now = EPOCH + 42_000;
    let ids = IdGenerator::with_clock(ManualClock::new(now), 1);
    let ctx = TraceContext::start(&ids, builder(), Arc::new(Collect::default())).unwrap();
    assert_eq!(parse_timestamp(ctx.trace_id()), Some(now));
  }

  #[test]
  fn test_resume_or_start_prefers_inbound_id() {
    let ids = IdGenerator::with_clock(ManualClock::new(EPOCH + 1), 1);
    let sink: Arc<Collect> = Arc::new(Collect::default());

    let resumed = TraceContext::resume_or_start(Some(" F00D "), &ids, builder(), sink.clone()).unwrap();
    assert_eq!(resumed.trace_id(), "F00D");

    let fresh = TraceContext::resume_or_start(Some("  "), &ids, builder(), sink).unwrap();
    assert_ne!(fresh.trace_id(), "");
  }

  #[test]
  fn test_empty_trace_id_is_rejected() {
    assert!(matches!(
      TraceContext::resume("", builder(), Arc::new(Collect::default())),
      Err(LogixError::InvalidArgument(_))
    ));
  }

  #[test]
  fn test_child_carrier_shares_depth_across_threads() {
    let sink = Arc::new(Collect::default());
    let ctx = TraceContext::resume("T1", builder(), sink.clone()).unwrap();

    let outer = ctx.enter("Handler.handle");
    let child = ctx.child_carrier();
    thread::spawn(move || {
      child.in_scope("Worker.run", || {});
    })
    .join()
    .unwrap();
    drop(outer);

    assert_eq!(ctx.depth(), 4);
    let rows = trace_rows(&sink);
    assert_eq!(rows[1], ("Worker.run".to_string(), TracePosition::Start, 2));
    assert_eq!(rows[3], ("Handler.handle".to_string(), TracePosition::End, 4));
  }

  #[test]
  fn test_log_carries_trace_id() {
    let sink = Arc::new(Collect::default());
    let ctx = TraceContext::resume("T2", builder(), sink.clone()).unwrap();
    assert!(ctx.log(LogLevel::Warn, "slow path"));

    let events = sink.events.lock().unwrap();
    match &events[0] {
      LogEvent::Run(run) => {
        assert_eq!(run.header.trace_id.as_deref(), Some("T2"));
        assert_eq!(run.log_level, LogLevel::Warn);
        assert_eq!(run.content, "slow path");
      },
      other => panic!("expected run log, got {:?}", other),
    }
  }

  #[test]
  fn test_package_message_joins_args_by_line() {
    assert_eq!(package_message("failed", &[1, 2]), "failed\n1\n2");
    assert_eq!(package_message::<String>("plain", &[]), "plain");
  }
}
