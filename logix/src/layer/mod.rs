//! `tracing` bridge: every event recorded by the application becomes a
//! [`RunLogEvent`] handed to a [`LogSink`].
//!
//! Field mapping:
//! - `message` plus any other fields (one `key=value` per line) -> `content`
//! - target -> `className`, thread name -> `threadName`
//! - a `trace_id` field -> `traceId`
//! - a `method` field, else the callsite name -> `methodName`


use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event as TracingEvent, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

use crate::dispatcher::LogSink;
use crate::event::LogLevel;
use crate::trace_context::EventBuilder;
use crate::utils::now_millis;

/// Events from this crate are never shipped, so diagnostics can't loop back.
const SELF_TARGET: &str = "logix";

#[derive(Clone)]
pub struct LogixLayer {
  builder: Arc<EventBuilder>,
  sink: Arc<dyn LogSink>,
  seq: Arc<AtomicU64>,
}

impl std::fmt::Debug for LogixLayer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LogixLayer")
      .field("builder", &self.builder)
      .field("seq", &self.seq.load(Ordering::Relaxed))
      .finish()
  }
}

impl LogixLayer {
  pub fn new(builder: EventBuilder, sink: Arc<dyn LogSink>) -> Self {
    Self {
      builder: Arc::new(builder),
      sink,
      seq: Arc::new(AtomicU64::new(0)),
    }
  }

  fn is_own_target(target: &str) -> bool {
    target == SELF_TARGET
      || target
        .strip_prefix(SELF_TARGET)
        .is_some_and(|rest| rest.starts_with("::"))
  }
}

impl<S> Layer<S> for LogixLayer
where
  S: Subscriber + for<'a> LookupSpan<'a>,
{
  fn on_event(&self, event: &TracingEvent<'_>, _ctx: Context<'_, S>) {
    let metadata = event.metadata();
    if Self::is_own_target(metadata.target()) {
      return;
    }

    let mut visitor = EventVisitor::default();
    event.record(&mut visitor);

    let mut run = self.builder.run_log(
      LogLevel::from(metadata.level()),
      visitor.content(),
      visitor.trace_id.as_deref(),
      now_millis(),
    );
    run.header.method_name = visitor
      .method
      .unwrap_or_else(|| metadata.name().to_string());
    run.class_name = metadata.target().to_string();
    run.seq = self.seq.fetch_add(1, Ordering::Relaxed);

    self.sink.submit(run.into());
  }
}

#[derive(Default)]
struct EventVisitor {
  message: Option<String>,
  trace_id: Option<String>,
  method: Option<String>,
  extra: Vec<(&'static str, String)>,
}

impl EventVisitor {
  fn content(&self) -> String {
    let mut content = self.message.clone().unwrap_or_default();
    for (name, value) in &self.extra {
      if !content.is_empty() {
        content.push('\n');
      }
      let _ = write!(content, "{}={}", name, value);
    }
    content
  }

  fn record_value(&mut self, field: &Field, value: String) {
    match field.name() {
      "message" => self.message = Some(value),
      "trace_id" => self.trace_id = Some(value),
      "method" => self.method = Some(value),
      name => self.extra.push((name, value)),
    }
  }
}

impl Visit for EventVisitor {
  fn record_str(&mut self, field: &Field, value: &str) {
    self.record_value(field, value.to_string());
  }

  fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
    let mut rendered = value.to_string();
    let mut source = value.source();
    while let Some(cause) = source {
      let _ = write!(rendered, "\nCaused by: {}", cause);
      source = cause.source();
    }
    self.record_value(field, rendered);
  }

  fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
    self.record_value(field, format!("{:?}", value));
  }
}
