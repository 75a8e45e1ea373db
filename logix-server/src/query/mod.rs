use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Args;
use logix::config::ServerConfig;
use logix::query::{
  LogFilterCriteria, LogQueryRequest, LogQueryService, LogRealtimeRequest, RunLogReader,
  TraceLogReader, TraceQueryRequest, TraceQueryService,
};
use logix::store::{HttpStoreClient, StoreClient};
use logix::{LogixError, Result};
use serde::Serialize;

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
  #[arg(long)]
  pub app: Option<String>,
  #[arg(long)]
  pub env: Option<String>,
  /// TRACE, DEBUG, INFO, WARN or ERROR
  #[arg(long)]
  pub level: Option<String>,
  #[arg(long)]
  pub trace_id: Option<String>,
  /// Case-insensitive substring of the message
  #[arg(long, short)]
  pub keyword: Option<String>,
  #[arg(long)]
  pub server_ip: Option<String>,
  /// Epoch millis; the last hour when either bound is missing
  #[arg(long)]
  pub start: Option<i64>,
  #[arg(long)]
  pub end: Option<i64>,
}

impl FilterArgs {
  fn criteria(&self) -> LogFilterCriteria {
    LogFilterCriteria {
      app_name: self.app.clone(),
      env: self.env.clone(),
      level: self.level.clone(),
      trace_id: self.trace_id.clone(),
      keyword: self.keyword.clone(),
      server_ip: self.server_ip.clone(),
      start_time: self.start,
      end_time: self.end,
      cursor_dt: None,
      cursor_seq: None,
    }
  }
}

#[derive(Args, Debug)]
pub struct LogsArgs {
  #[command(flatten)]
  pub filter: FilterArgs,
  #[arg(long, default_value_t = 1)]
  pub page: u32,
  #[arg(long, default_value_t = logix::query::DEFAULT_PAGE_SIZE)]
  pub size: u32,
}

#[derive(Args, Debug)]
pub struct TailArgs {
  #[command(flatten)]
  pub filter: FilterArgs,
  #[arg(long)]
  pub limit: Option<u32>,
  /// Keep polling from the last row seen
  #[arg(long, short)]
  pub follow: bool,
  #[arg(long, default_value_t = 2_000)]
  pub interval_ms: u64,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
  pub trace_id: String,
  #[arg(long)]
  pub app: Option<String>,
  #[arg(long)]
  pub start: Option<i64>,
  #[arg(long)]
  pub end: Option<i64>,
}

fn store(config: &ServerConfig) -> Result<Arc<dyn StoreClient>> {
  Ok(Arc::new(HttpStoreClient::new(config.store.clone())?))
}

fn log_service(config: &ServerConfig) -> Result<LogQueryService> {
  let reader = RunLogReader::new(store(config)?, &config.store.database);
  Ok(LogQueryService::new(reader))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let json = serde_json::to_string_pretty(value)?;
  println!("{}", json);
  Ok(())
}

pub fn logs(config: &ServerConfig, args: LogsArgs) -> Result<()> {
  let request = LogQueryRequest {
    criteria: args.filter.criteria(),
    page_num: args.page,
    page_size: args.size,
  };
  print_json(&log_service(config)?.query_logs(&request)?)
}

pub fn tail(config: &ServerConfig, args: TailArgs) -> Result<()> {
  let service = log_service(config)?;
  let mut request = LogRealtimeRequest {
    criteria: args.filter.criteria(),
    limit: args.limit,
  };

  loop {
    let records = service.poll_latest_logs(&request)?;
    for record in &records {
      println!("{}", serde_json::to_string(record)?);
    }
    if !args.follow {
      return Ok(());
    }
    if let Some(last) = records.last() {
      request.criteria.cursor_dt = Some(last.dt);
      request.criteria.cursor_seq = Some(last.seq);
    }
    // Follow mode slides the window forward with the clock.
    request.criteria.end_time = None;
    request.criteria.start_time = request.criteria.cursor_dt.or(request.criteria.start_time);
    thread::sleep(Duration::from_millis(args.interval_ms.max(100)));
  }
}

pub fn trace(config: &ServerConfig, args: TraceArgs) -> Result<()> {
  if args.trace_id.trim().is_empty() {
    return Err(LogixError::InvalidArgument("trace id is required".to_string()));
  }
  let reader = TraceLogReader::new(store(config)?, &config.store.database);
  let request = TraceQueryRequest {
    trace_id: args.trace_id,
    app_name: args.app,
    start_time: args.start,
    end_time: args.end,
  };
  print_json(&TraceQueryService::new(reader).query_trace(&request)?)
}

#[derive(Serialize)]
struct Catalog {
  applications: Vec<String>,
  environments: Vec<String>,
}

pub fn apps(config: &ServerConfig) -> Result<()> {
  let service = log_service(config)?;
  print_json(&Catalog {
    applications: service.list_applications()?,
    environments: service.list_environments()?,
  })
}
