//! Event stamping and explicit trace propagation.
//!
//! There is no ambient per-thread trace state. A [`TraceContext`] is created
//! where a trace begins (or resumed from an inbound id) and passed along the
//! call chain; [`TraceContext::child_carrier`] hands it to another thread.

mod __test__;

use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::dispatcher::LogSink;
use crate::error::{LogixError, Result};
use crate::event::{EventHeader, LogLevel, RunLogEvent, TraceLogEvent, TracePosition};
use crate::id_gen::{Clock, IdGenerator};
use crate::net;
use crate::utils::{current_thread_name, now_millis};

/// Stamps the per-process fields every event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBuilder {
  app_name: String,
  env: String,
  server_ip: String,
}

impl EventBuilder {
  pub fn new(app_name: impl Into<String>, env: impl Into<String>) -> Self {
    Self {
      app_name: app_name.into(),
      env: env.into(),
      server_ip: net::local_ip().to_string(),
    }
  }

  pub fn with_server_ip(mut self, server_ip: impl Into<String>) -> Self {
    self.server_ip = server_ip.into();
    self
  }

  pub fn app_name(&self) -> &str {
    &self.app_name
  }

  pub fn env(&self) -> &str {
    &self.env
  }

  pub fn server_ip(&self) -> &str {
    &self.server_ip
  }

  fn header(&self, event_time: i64, method_name: String, trace_id: Option<&str>) -> EventHeader {
    EventHeader {
      event_time,
      app_name: self.app_name.clone(),
      env: self.env.clone(),
      server_ip: self.server_ip.clone(),
      method_name,
      trace_id: trace_id.map(str::to_string),
    }
  }

  /// Run log with the process fields filled; `seq`, class and method are left
  /// for the caller.
  pub fn run_log(
    &self,
    level: LogLevel,
    content: impl Into<String>,
    trace_id: Option<&str>,
    event_time: i64,
  ) -> RunLogEvent {
    RunLogEvent {
      header: self.header(event_time, String::new(), trace_id),
      log_level: level,
      content: content.into(),
      thread_name: current_thread_name(),
      ..Default::default()
    }
  }

  pub fn trace_log(
    &self,
    signature: impl Into<String>,
    position: TracePosition,
    depth: u32,
    trace_id: Option<&str>,
    event_time: i64,
  ) -> TraceLogEvent {
    TraceLogEvent {
      header: self.header(event_time, signature.into(), trace_id),
      position,
      depth,
    }
  }
}

/// Message followed by each argument on its own line.
pub fn package_message<T: Display>(message: &str, args: &[T]) -> String {
  let mut out = String::with_capacity(message.len() + 16 * args.len());
  out.push_str(message);
  for arg in args {
    out.push('\n');
    out.push_str(&arg.to_string());
  }
  out
}

/// An active trace: its id, the shared call depth, and where events go.
///
/// Cloning (or [`child_carrier`](Self::child_carrier)) shares the depth
/// counter, so work handed to another thread keeps numbering the same trace.
#[derive(Clone)]
pub struct TraceContext {
  trace_id: Arc<str>,
  depth: Arc<AtomicU32>,
  builder: Arc<EventBuilder>,
  sink: Arc<dyn LogSink>,
}

impl std::fmt::Debug for TraceContext {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TraceContext")
      .field("trace_id", &self.trace_id)
      .field("depth", &self.depth())
      .finish()
  }
}

impl TraceContext {
  /// Begin a new trace with a fresh id.
  pub fn start<C: Clock>(
    ids: &IdGenerator<C>,
    builder: Arc<EventBuilder>,
    sink: Arc<dyn LogSink>,
  ) -> Result<Self> {
    let trace_id = ids.next_trace_id()?;
    Self::resume(&trace_id, builder, sink)
  }

  /// Continue a trace whose id arrived from elsewhere, e.g. a request header.
  pub fn resume(trace_id: &str, builder: Arc<EventBuilder>, sink: Arc<dyn LogSink>) -> Result<Self> {
    let trace_id = trace_id.trim();
    if trace_id.is_empty() {
      return Err(LogixError::InvalidArgument("trace id must not be empty".to_string()));
    }
    Ok(Self {
      trace_id: Arc::from(trace_id),
      depth: Arc::new(AtomicU32::new(0)),
      builder,
      sink,
    })
  }

  /// Resume `inbound` when it is non-blank, otherwise start a new trace.
  pub fn resume_or_start<C: Clock>(
    inbound: Option<&str>,
    ids: &IdGenerator<C>,
    builder: Arc<EventBuilder>,
    sink: Arc<dyn LogSink>,
  ) -> Result<Self> {
    match inbound.map(str::trim).filter(|id| !id.is_empty()) {
      Some(id) => Self::resume(id, builder, sink),
      None => Self::start(ids, builder, sink),
    }
  }

  pub fn trace_id(&self) -> &str {
    &self.trace_id
  }

  pub fn depth(&self) -> u32 {
    self.depth.load(Ordering::SeqCst)
  }

  /// Same trace, same depth counter; meant to be moved into another thread.
  pub fn child_carrier(&self) -> TraceContext {
    self.clone()
  }

  fn emit(&self, signature: &str, position: TracePosition) {
    let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
    let event = self.builder.trace_log(
      signature,
      position,
      depth,
      Some(&self.trace_id),
      now_millis(),
    );
    self.sink.submit(event.into());
  }

  /// Record entry into `signature`. The returned guard records the exit.
  pub fn enter(&self, signature: impl Into<String>) -> TraceScope<'_> {
    let signature = signature.into();
    self.emit(&signature, TracePosition::Start);
    TraceScope {
      context: self,
      signature,
    }
  }

  /// Run `f` between a START and an END record.
  pub fn in_scope<R>(&self, signature: impl Into<String>, f: impl FnOnce() -> R) -> R {
    let _scope = self.enter(signature);
    f()
  }

  /// Ship a run log that belongs to this trace.
  pub fn log(&self, level: LogLevel, content: impl Into<String>) -> bool {
    let event = self
      .builder
      .run_log(level, content, Some(&self.trace_id), now_millis());
    self.sink.submit(event.into())
  }
}

/// Emits the END record of a traced call when dropped.
#[must_use = "the call is closed as soon as the scope is dropped"]
pub struct TraceScope<'a> {
  context: &'a TraceContext,
  signature: String,
}

impl TraceScope<'_> {
  pub fn signature(&self) -> &str {
    &self.signature
  }
}

impl Drop for TraceScope<'_> {
  fn drop(&mut self) {
    self.context.emit(&self.signature, TracePosition::End);
  }
}
