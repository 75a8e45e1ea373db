//! # Store
//!
//! Columnar store access. [`StoreClient`] is the seam to the external store;
//! [`HttpStoreClient`] speaks the ClickHouse HTTP interface. The table writers
//! encode batches with [`RowBinaryEncoder`] and insert them asynchronously on
//! the store side.


use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};

use crate::config::StoreConfig;
use crate::error::{LogixError, Result};
use crate::event::{RunLogEvent, TraceLogEvent};
use crate::row_binary::{RowBinary, RowBinaryEncoder};

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

const INSERT_SETTINGS: &str = "SETTINGS async_insert=1, wait_for_async_insert=0 FORMAT RowBinary";

pub const RUN_LOG_COLUMNS: &str = "event_time, app_name, env, server_ip, seq, log_level, content, \
   class_name, method_name, thread_name, trace_id";
pub const TRACE_LOG_COLUMNS: &str =
  "event_time, app_name, env, server_ip, trace_id, method_name, position, depth";

pub fn run_log_table(database: &str) -> String {
  format!("{}.run_logs", database)
}

pub fn trace_log_table(database: &str) -> String {
  format!("{}.trace_logs", database)
}

/// Transport to the columnar store.
pub trait StoreClient: Send + Sync {
  /// Execute an `INSERT ... FORMAT RowBinary` statement with `body` as data.
  fn insert(&self, sql: &str, body: Vec<u8>) -> Result<()>;

  /// Execute a SELECT and return its rows.
  fn query(&self, sql: &str) -> Result<Vec<Row>>;
}

/// ClickHouse HTTP interface client.
#[derive(Debug, Clone)]
pub struct HttpStoreClient {
  http: reqwest::blocking::Client,
  config: StoreConfig,
}

impl HttpStoreClient {
  pub fn new(config: StoreConfig) -> Result<Self> {
    let http = reqwest::blocking::Client::builder()
      .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
      .timeout(Duration::from_millis(config.request_timeout_ms))
      .build()
      .map_err(|e| LogixError::Config(format!("cannot build store client: {}", e)))?;
    tracing::info!(url = %config.url, database = %config.database, "store client ready");
    Ok(Self { http, config })
  }

  pub fn config(&self) -> &StoreConfig {
    &self.config
  }

  fn request(&self, params: &[(&str, &str)]) -> reqwest::blocking::RequestBuilder {
    let mut request = self
      .http
      .post(&self.config.url)
      .query(&[("database", self.config.database.as_str())])
      .query(params);
    if let Some(user) = self.config.username.as_deref().filter(|u| !u.is_empty()) {
      request = request.basic_auth(user, self.config.password.as_deref());
    }
    request
  }

  fn send(request: reqwest::blocking::RequestBuilder) -> std::result::Result<String, String> {
    let response = request.send().map_err(|e| e.to_string())?;
    let status = response.status();
    let text = response.text().map_err(|e| e.to_string())?;
    if !status.is_success() {
      return Err(format!("{}: {}", status, text.trim()));
    }
    Ok(text)
  }
}

impl StoreClient for HttpStoreClient {
  fn insert(&self, sql: &str, body: Vec<u8>) -> Result<()> {
    let request = self.request(&[("query", sql)]).body(body);
    Self::send(request).map(|_| ()).map_err(LogixError::Store)
  }

  fn query(&self, sql: &str) -> Result<Vec<Row>> {
    let statement = format!("{} FORMAT JSONEachRow", sql);
    let request = self
      .request(&[("output_format_json_quote_64bit_integers", "0")])
      .body(statement);
    let text = Self::send(request).map_err(LogixError::Query)?;
    parse_json_each_row(&text)
  }
}

/// Parse a `JSONEachRow` response body.
pub fn parse_json_each_row(body: &str) -> Result<Vec<Row>> {
  body
    .lines()
    .filter(|line| !line.trim().is_empty())
    .map(|line| match serde_json::from_str::<Value>(line) {
      Ok(Value::Object(row)) => Ok(row),
      Ok(other) => Err(LogixError::Query(format!("expected a JSON object row, got {}", other))),
      Err(e) => Err(LogixError::Query(format!("malformed row: {}", e))),
    })
    .collect()
}

/// Bulk insert of one event type into its table.
pub trait TableWriter<E>: Send + Sync {
  fn batch_insert(&self, events: &[E]) -> Result<()>;
}

impl RowBinary for RunLogEvent {
  fn write_row<W: Write>(&self, enc: &mut RowBinaryEncoder<W>) -> Result<()> {
    let h = &self.header;
    enc.write_datetime64_millis(Some(h.event_time))?;
    enc.write_string(Some(&h.app_name))?;
    enc.write_string(Some(&h.env))?;
    enc.write_string(Some(&h.server_ip))?;
    enc.write_u64(Some(self.seq))?;
    enc.write_enum8(self.log_level.code())?;
    enc.write_string(Some(&self.content))?;
    enc.write_string(Some(&self.class_name))?;
    enc.write_string(Some(&h.method_name))?;
    enc.write_string(Some(&self.thread_name))?;
    enc.write_string(h.trace_id.as_deref())
  }
}

impl RowBinary for TraceLogEvent {
  fn write_row<W: Write>(&self, enc: &mut RowBinaryEncoder<W>) -> Result<()> {
    let h = &self.header;
    enc.write_datetime64_millis(Some(h.event_time))?;
    enc.write_string(Some(&h.app_name))?;
    enc.write_string(Some(&h.env))?;
    enc.write_string(Some(&h.server_ip))?;
    enc.write_string(h.trace_id.as_deref())?;
    enc.write_string(Some(&h.method_name))?;
    enc.write_enum8(self.position.code())?;
    enc.write_u16(Some(u16::try_from(self.depth).unwrap_or(u16::MAX)))
  }
}

/// Encode `rows` back to back.
pub fn encode_rows<R: RowBinary>(rows: &[R], estimated_row_bytes: usize) -> Result<Vec<u8>> {
  let mut encoder = RowBinaryEncoder::with_capacity(estimated_row_bytes * rows.len());
  for row in rows {
    encoder.write_row(row)?;
  }
  Ok(encoder.into_inner())
}

fn insert_batch<R: RowBinary>(
  store: &dyn StoreClient,
  table: &str,
  sql: &str,
  rows: &[R],
  estimated_row_bytes: usize,
) -> Result<()> {
  if rows.is_empty() {
    return Ok(());
  }
  let started = Instant::now();
  let body = encode_rows(rows, estimated_row_bytes)?;
  store.insert(sql, body)?;
  tracing::info!(
    table = table,
    size = rows.len(),
    cost_ms = started.elapsed().as_millis() as u64,
    "batch insert succeeded"
  );
  Ok(())
}

pub struct RunLogWriter {
  store: Arc<dyn StoreClient>,
  table: String,
  insert_sql: String,
}

impl RunLogWriter {
  const ESTIMATED_ROW_BYTES: usize = 512;

  pub fn new(store: Arc<dyn StoreClient>, database: &str) -> Self {
    let table = run_log_table(database);
    let insert_sql = format!("INSERT INTO {} ({}) {}", table, RUN_LOG_COLUMNS, INSERT_SETTINGS);
    Self {
      store,
      table,
      insert_sql,
    }
  }

  pub fn insert_sql(&self) -> &str {
    &self.insert_sql
  }
}

impl TableWriter<RunLogEvent> for RunLogWriter {
  fn batch_insert(&self, events: &[RunLogEvent]) -> Result<()> {
    insert_batch(
      self.store.as_ref(),
      &self.table,
      &self.insert_sql,
      events,
      Self::ESTIMATED_ROW_BYTES,
    )
  }
}

pub struct TraceLogWriter {
  store: Arc<dyn StoreClient>,
  table: String,
  insert_sql: String,
}

impl TraceLogWriter {
  const ESTIMATED_ROW_BYTES: usize = 256;

  pub fn new(store: Arc<dyn StoreClient>, database: &str) -> Self {
    let table = trace_log_table(database);
    let insert_sql = format!("INSERT INTO {} ({}) {}", table, TRACE_LOG_COLUMNS, INSERT_SETTINGS);
    Self {
      store,
      table,
      insert_sql,
    }
  }

  pub fn insert_sql(&self) -> &str {
    &self.insert_sql
  }
}

impl TableWriter<TraceLogEvent> for TraceLogWriter {
  fn batch_insert(&self, events: &[TraceLogEvent]) -> Result<()> {
    insert_batch(
      self.store.as_ref(),
      &self.table,
      &self.insert_sql,
      events,
      Self::ESTIMATED_ROW_BYTES,
    )
  }
}
