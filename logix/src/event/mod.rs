mod __test__;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::transport::{RUN_TOPIC, TRACE_TOPIC};

/// Severity of a run log event.
///
/// Ordered from the most detailed to the most severe:
/// `Trace < Debug < Info < Warn < Error`.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Warn,
  Error,
}

impl LogLevel {
  pub fn as_str(&self) -> &'static str {
    match self {
      LogLevel::Trace => "TRACE",
      LogLevel::Debug => "DEBUG",
      LogLevel::Info => "INFO",
      LogLevel::Warn => "WARN",
      LogLevel::Error => "ERROR",
    }
  }

  /// Case-insensitive lookup by name; `None` for unknown names.
  pub fn parse(name: &str) -> Option<Self> {
    match name.trim().to_ascii_uppercase().as_str() {
      "TRACE" => Some(LogLevel::Trace),
      "DEBUG" => Some(LogLevel::Debug),
      "INFO" => Some(LogLevel::Info),
      "WARN" | "WARNING" => Some(LogLevel::Warn),
      "ERROR" => Some(LogLevel::Error),
      _ => None,
    }
  }

  /// Enum8 code used by the `run_logs.log_level` column.
  pub fn code(&self) -> u8 {
    match self {
      LogLevel::Trace => 1,
      LogLevel::Debug => 2,
      LogLevel::Info => 3,
      LogLevel::Warn => 4,
      LogLevel::Error => 5,
    }
  }

  pub fn from_code(code: u8) -> Option<Self> {
    match code {
      1 => Some(LogLevel::Trace),
      2 => Some(LogLevel::Debug),
      3 => Some(LogLevel::Info),
      4 => Some(LogLevel::Warn),
      5 => Some(LogLevel::Error),
      _ => None,
    }
  }
}

impl From<&tracing::Level> for LogLevel {
  fn from(level: &tracing::Level) -> Self {
    match *level {
      tracing::Level::TRACE => LogLevel::Trace,
      tracing::Level::DEBUG => LogLevel::Debug,
      tracing::Level::INFO => LogLevel::Info,
      tracing::Level::WARN => LogLevel::Warn,
      tracing::Level::ERROR => LogLevel::Error,
    }
  }
}

impl std::fmt::Display for LogLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Which pipeline lane an event travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
  Run,
  Trace,
}

impl Category {
  pub const ALL: [Category; 2] = [Category::Run, Category::Trace];

  pub fn as_str(&self) -> &'static str {
    match self {
      Category::Run => "RUN",
      Category::Trace => "TRACE",
    }
  }

  /// Bus topic carrying this category.
  pub fn topic(&self) -> &'static str {
    match self {
      Category::Run => RUN_TOPIC,
      Category::Trace => TRACE_TOPIC,
    }
  }

  /// Anything that is not the run topic is treated as trace traffic.
  pub fn from_topic(topic: &str) -> Self {
    if topic == RUN_TOPIC {
      Category::Run
    } else {
      Category::Trace
    }
  }
}

impl std::fmt::Display for Category {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Call-boundary marker of a trace event.
///
/// Serialized as `START`/`END`; the compact `<`/`>` markers are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TracePosition {
  #[serde(rename = "START", alias = "<")]
  Start,
  #[serde(rename = "END", alias = ">")]
  End,
}

impl TracePosition {
  /// Enum8 code used by the `trace_logs.position` column.
  pub fn code(&self) -> u8 {
    match self {
      TracePosition::Start => 1,
      TracePosition::End => 2,
    }
  }

  pub fn from_code(code: u8) -> Option<Self> {
    match code {
      1 => Some(TracePosition::Start),
      2 => Some(TracePosition::End),
      _ => None,
    }
  }
}

/// Fields shared by every event variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventHeader {
  /// Event time in epoch milliseconds.
  pub event_time: i64,
  pub app_name: String,
  #[serde(default)]
  pub env: String,
  #[serde(default)]
  pub server_ip: String,
  #[serde(default)]
  pub method_name: String,
  /// Set only when a trace context was active where the event was emitted.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub trace_id: Option<String>,
}

/// A regular application log line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunLogEvent {
  #[serde(flatten)]
  pub header: EventHeader,
  /// Per-process sequence number, breaks ties inside one millisecond.
  #[serde(default)]
  pub seq: u64,
  #[serde(default)]
  pub log_level: LogLevel,
  /// Rendered message, formatted arguments and stack text.
  #[serde(default)]
  pub content: String,
  #[serde(default)]
  pub class_name: String,
  #[serde(default)]
  pub thread_name: String,
}

/// A method-boundary record of a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceLogEvent {
  #[serde(flatten)]
  pub header: EventHeader,
  pub position: TracePosition,
  /// Incremented on both entry and exit, so START and END of one call differ.
  #[serde(default)]
  pub depth: u32,
}

/// Sum type over the two event categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
  Run(RunLogEvent),
  Trace(TraceLogEvent),
}

impl LogEvent {
  pub fn category(&self) -> Category {
    match self {
      LogEvent::Run(_) => Category::Run,
      LogEvent::Trace(_) => Category::Trace,
    }
  }

  pub fn header(&self) -> &EventHeader {
    match self {
      LogEvent::Run(ev) => &ev.header,
      LogEvent::Trace(ev) => &ev.header,
    }
  }

  /// Wire payload: the variant's JSON object, without a category tag.
  pub fn to_json(&self) -> Result<String> {
    let json = match self {
      LogEvent::Run(ev) => serde_json::to_string(ev)?,
      LogEvent::Trace(ev) => serde_json::to_string(ev)?,
    };
    Ok(json)
  }

  /// Parses a wire payload; the category comes from the topic it arrived on.
  pub fn from_json(category: Category, payload: &str) -> Result<Self> {
    let event = match category {
      Category::Run => LogEvent::Run(serde_json::from_str(payload)?),
      Category::Trace => LogEvent::Trace(serde_json::from_str(payload)?),
    };
    Ok(event)
  }
}

impl From<RunLogEvent> for LogEvent {
  fn from(ev: RunLogEvent) -> Self {
    LogEvent::Run(ev)
  }
}

impl From<TraceLogEvent> for LogEvent {
  fn from(ev: TraceLogEvent) -> Self {
    LogEvent::Trace(ev)
  }
}

impl std::fmt::Display for LogEvent {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.to_json() {
      Ok(json) => write!(f, "{}({})", self.category(), json),
      Err(_) => write!(f, "{}(<unserializable>)", self.category()),
    }
  }
}
