//! # Query
//!
//! Read side of the store: filtered run-log listings, cursor-based tailing,
//! and trace reconstruction.
//!
//! Readers build SQL and map result rows; services add defaults, paging and
//! tree building on top. Every store failure on this path surfaces as
//! [`LogixError::Query`].

mod __test__;

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LogixError, Result};
use crate::event::{LogLevel, TracePosition};
use crate::store::{run_log_table, trace_log_table, Row, StoreClient};
use crate::trace_tree::{build_trace_tree, TraceNode, TraceRow};
use crate::utils::now_millis;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_POLL_LIMIT: u32 = 200;
/// Window applied when a request leaves the time range open.
pub const DEFAULT_WINDOW_MS: i64 = 60 * 60 * 1000;

/// Filters shared by listing and tailing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogFilterCriteria {
  pub app_name: Option<String>,
  pub env: Option<String>,
  pub level: Option<String>,
  pub trace_id: Option<String>,
  pub keyword: Option<String>,
  pub server_ip: Option<String>,
  pub start_time: Option<i64>,
  pub end_time: Option<i64>,
  /// Last seen `(dt, seq)` when tailing.
  pub cursor_dt: Option<i64>,
  pub cursor_seq: Option<u64>,
}

fn default_page_num() -> u32 {
  1
}

fn default_page_size() -> u32 {
  DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQueryRequest {
  #[serde(flatten)]
  pub criteria: LogFilterCriteria,
  /// 1-based.
  #[serde(default = "default_page_num")]
  pub page_num: u32,
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

impl Default for LogQueryRequest {
  fn default() -> Self {
    Self {
      criteria: LogFilterCriteria::default(),
      page_num: default_page_num(),
      page_size: default_page_size(),
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRealtimeRequest {
  #[serde(flatten)]
  pub criteria: LogFilterCriteria,
  pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TraceQueryRequest {
  pub trace_id: String,
  pub app_name: Option<String>,
  pub start_time: Option<i64>,
  pub end_time: Option<i64>,
}

/// One run-log row as returned to callers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
  pub dt: i64,
  pub seq: u64,
  pub app_name: String,
  pub env: String,
  pub server_ip: String,
  pub level: String,
  pub content: String,
  pub trace_id: Option<String>,
  pub class_name: String,
  pub method: String,
  pub thread_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult<T> {
  pub total: u64,
  pub page_num: u32,
  pub page_size: u32,
  pub has_next: bool,
  pub total_pages: u64,
  pub data: Vec<T>,
}

impl<T> PageResult<T> {
  pub fn new(total: u64, page_num: u32, page_size: u32, data: Vec<T>) -> Self {
    let size = u64::from(page_size.max(1));
    Self {
      total,
      page_num,
      page_size,
      has_next: u64::from(page_num) * size < total,
      total_pages: total.div_ceil(size),
      data,
    }
  }
}

/// Quote a string literal for the store's SQL dialect.
pub fn quote(value: &str) -> String {
  let mut out = String::with_capacity(value.len() + 2);
  out.push('\'');
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\'' => out.push_str("\\'"),
      _ => out.push(c),
    }
  }
  out.push('\'');
  out
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn row_i64(row: &Row, key: &str) -> Option<i64> {
  match row.get(key)? {
    Value::Number(n) => n.as_i64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

fn row_u64(row: &Row, key: &str) -> Option<u64> {
  match row.get(key)? {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => s.parse().ok(),
    _ => None,
  }
}

fn row_string(row: &Row, key: &str) -> String {
  match row.get(key) {
    Some(Value::String(s)) => s.clone(),
    Some(Value::Null) | None => String::new(),
    Some(other) => other.to_string(),
  }
}

fn row_opt_string(row: &Row, key: &str) -> Option<String> {
  Some(row_string(row, key)).filter(|s| !s.is_empty())
}

fn to_log_record(row: &Row) -> Result<LogRecord> {
  let dt = row_i64(row, "dt").ok_or_else(|| LogixError::Query("row without dt".to_string()))?;
  let level = row_i64(row, "log_level")
    .and_then(|code| u8::try_from(code).ok())
    .and_then(LogLevel::from_code)
    .unwrap_or_default();
  Ok(LogRecord {
    dt,
    seq: row_u64(row, "seq").unwrap_or(0),
    app_name: row_string(row, "app_name"),
    env: row_string(row, "env"),
    server_ip: row_string(row, "server_ip"),
    level: level.as_str().to_string(),
    content: row_string(row, "content"),
    trace_id: row_opt_string(row, "trace_id"),
    class_name: row_string(row, "class_name"),
    method: row_string(row, "method_name"),
    thread_name: row_string(row, "thread_name"),
  })
}

fn to_trace_row(row: &Row) -> TraceRow {
  TraceRow {
    trace_id: row_string(row, "trace_id"),
    method_name: row_string(row, "method_name"),
    dt: row_i64(row, "dt"),
    app_name: row_string(row, "app_name"),
    server_ip: row_string(row, "server_ip"),
    position: row_i64(row, "position")
      .and_then(|code| u8::try_from(code).ok())
      .and_then(TracePosition::from_code),
    depth: row_i64(row, "depth").and_then(|d| u32::try_from(d).ok()),
  }
}

const RUN_LOG_SELECT: &str = "seq, toInt8(log_level) AS log_level, \
   toUnixTimestamp64Milli(event_time) AS dt, app_name, env, server_ip, method_name, content, \
   class_name, thread_name, trace_id";

/// Reads the run-log table.
pub struct RunLogReader {
  store: Arc<dyn StoreClient>,
  table: String,
}

impl RunLogReader {
  pub fn new(store: Arc<dyn StoreClient>, database: &str) -> Self {
    Self {
      store,
      table: run_log_table(database),
    }
  }

  fn where_clause(criteria: &LogFilterCriteria, with_cursor: bool) -> String {
    let mut sql = String::from(" WHERE 1=1");
    let equals = [
      ("app_name", &criteria.app_name),
      ("env", &criteria.env),
      ("trace_id", &criteria.trace_id),
      ("server_ip", &criteria.server_ip),
    ];
    for (column, value) in equals {
      if let Some(value) = non_empty(value) {
        let _ = write!(sql, " AND {} = {}", column, quote(value));
      }
    }
    if let Some(level) = non_empty(&criteria.level).and_then(LogLevel::parse) {
      let _ = write!(sql, " AND log_level = {}", level.code());
    }
    if let Some(start) = criteria.start_time {
      let _ = write!(sql, " AND event_time >= toDateTime64({} / 1000, 3)", start);
    }
    if let Some(end) = criteria.end_time {
      let _ = write!(sql, " AND event_time <= toDateTime64({} / 1000, 3)", end);
    }
    if let Some(keyword) = non_empty(&criteria.keyword) {
      let _ = write!(sql, " AND positionCaseInsensitive(content, {}) > 0", quote(keyword));
    }
    if with_cursor {
      if let (Some(dt), Some(seq)) = (criteria.cursor_dt, criteria.cursor_seq) {
        let _ = write!(sql, " AND (event_time, seq) > (toDateTime64({} / 1000, 3), {})", dt, seq);
      }
    }
    sql
  }

  fn fetch(&self, sql: &str) -> Result<Vec<LogRecord>> {
    tracing::debug!(sql = sql, "run log query");
    self.store.query(sql)?.iter().map(to_log_record).collect()
  }

  /// Newest first.
  pub fn query_logs(
    &self,
    criteria: &LogFilterCriteria,
    offset: u64,
    limit: u32,
  ) -> Result<Vec<LogRecord>> {
    let mut sql = format!(
      "SELECT {} FROM {}{} ORDER BY event_time DESC, seq DESC LIMIT {}",
      RUN_LOG_SELECT,
      self.table,
      Self::where_clause(criteria, false),
      limit
    );
    if offset > 0 {
      let _ = write!(sql, " OFFSET {}", offset);
    }
    self.fetch(&sql)
  }

  /// Oldest first, strictly after the cursor when one is given.
  pub fn poll_logs(&self, criteria: &LogFilterCriteria, limit: u32) -> Result<Vec<LogRecord>> {
    let sql = format!(
      "SELECT {} FROM {}{} ORDER BY event_time ASC, seq ASC LIMIT {}",
      RUN_LOG_SELECT,
      self.table,
      Self::where_clause(criteria, true),
      limit
    );
    self.fetch(&sql)
  }

  pub fn query_count(&self, criteria: &LogFilterCriteria) -> Result<u64> {
    let sql = format!(
      "SELECT count() AS total FROM {}{}",
      self.table,
      Self::where_clause(criteria, false)
    );
    let rows = self.store.query(&sql)?;
    rows
      .first()
      .and_then(|row| row_u64(row, "total"))
      .ok_or_else(|| LogixError::Query("count returned no total".to_string()))
  }

  pub fn query_app_names(&self) -> Result<Vec<String>> {
    let sql = format!(
      "SELECT DISTINCT app_name FROM {} ORDER BY app_name",
      self.table
    );
    self.distinct(&sql, "app_name")
  }

  pub fn query_envs(&self) -> Result<Vec<String>> {
    let sql = format!(
      "SELECT DISTINCT env FROM {} WHERE env != '' ORDER BY env",
      self.table
    );
    self.distinct(&sql, "env")
  }

  fn distinct(&self, sql: &str, column: &str) -> Result<Vec<String>> {
    Ok(
      self
        .store
        .query(sql)?
        .iter()
        .map(|row| row_string(row, column))
        .collect(),
    )
  }
}

/// Reads the trace table.
pub struct TraceLogReader {
  store: Arc<dyn StoreClient>,
  table: String,
}

impl TraceLogReader {
  pub fn new(store: Arc<dyn StoreClient>, database: &str) -> Self {
    Self {
      store,
      table: trace_log_table(database),
    }
  }

  /// All rows of one trace in time order.
  pub fn query_by_trace_id(&self, request: &TraceQueryRequest) -> Result<Vec<TraceRow>> {
    let mut sql = format!(
      "SELECT trace_id, method_name, toUnixTimestamp64Milli(event_time) AS dt, app_name, \
       server_ip, toInt8(position) AS position, depth FROM {} WHERE trace_id = {}",
      self.table,
      quote(request.trace_id.trim())
    );
    if let Some(app) = non_empty(&request.app_name) {
      let _ = write!(sql, " AND app_name = {}", quote(app));
    }
    if let Some(start) = request.start_time {
      let _ = write!(sql, " AND event_time >= fromUnixTimestamp64Milli({})", start);
    }
    if let Some(end) = request.end_time {
      let _ = write!(sql, " AND event_time <= fromUnixTimestamp64Milli({})", end);
    }
    sql.push_str(" ORDER BY event_time ASC");
    tracing::debug!(sql = %sql, "trace query");
    Ok(self.store.query(&sql)?.iter().map(to_trace_row).collect())
  }
}

pub struct LogQueryService {
  reader: RunLogReader,
}

impl LogQueryService {
  pub fn new(reader: RunLogReader) -> Self {
    Self { reader }
  }

  fn with_default_window(criteria: &LogFilterCriteria, now: i64) -> LogFilterCriteria {
    let mut criteria = criteria.clone();
    if criteria.start_time.is_none() || criteria.end_time.is_none() {
      let end = criteria.end_time.unwrap_or(now);
      criteria.end_time = Some(end);
      criteria.start_time = Some(criteria.start_time.unwrap_or(end - DEFAULT_WINDOW_MS));
    }
    criteria
  }

  pub fn query_logs(&self, request: &LogQueryRequest) -> Result<PageResult<LogRecord>> {
    let criteria = Self::with_default_window(&request.criteria, now_millis());
    let page_num = request.page_num.max(1);
    let page_size = request.page_size.max(1);
    let offset = u64::from(page_num - 1) * u64::from(page_size);

    let total = self.reader.query_count(&criteria)?;
    let data = if total > offset {
      self.reader.query_logs(&criteria, offset, page_size)?
    } else {
      Vec::new()
    };
    Ok(PageResult::new(total, page_num, page_size, data))
  }

  pub fn poll_latest_logs(&self, request: &LogRealtimeRequest) -> Result<Vec<LogRecord>> {
    let criteria = Self::with_default_window(&request.criteria, now_millis());
    let limit = request.limit.filter(|&l| l > 0).unwrap_or(DEFAULT_POLL_LIMIT);
    self.reader.poll_logs(&criteria, limit)
  }

  pub fn list_applications(&self) -> Result<Vec<String>> {
    self.reader.query_app_names()
  }

  pub fn list_environments(&self) -> Result<Vec<String>> {
    self.reader.query_envs()
  }
}

pub struct TraceQueryService {
  reader: TraceLogReader,
}

impl TraceQueryService {
  pub fn new(reader: TraceLogReader) -> Self {
    Self { reader }
  }

  pub fn query_trace(&self, request: &TraceQueryRequest) -> Result<Vec<TraceNode>> {
    if request.trace_id.trim().is_empty() {
      return Err(LogixError::InvalidArgument("trace id is required".to_string()));
    }
    let rows = self.reader.query_by_trace_id(request)?;
    tracing::debug!(trace_id = %request.trace_id, rows = rows.len(), "building trace tree");
    Ok(build_trace_tree(&rows))
  }
}
