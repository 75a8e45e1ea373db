//! # Server consume pipeline
//!
//! ```text
//! bus --poll--> Poller --route--> Router --+--> run queue   --> BatchWriter --> run_logs
//!                                          +--> trace queue --> BatchWriter --> trace_logs
//! ```
//!
//! The poller never blocks on a slow writer: a full lane queue drops the
//! event. Each writer flushes whatever it gathered once its first item shows
//! up, and drains its queue one last time on shutdown.


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::de::DeserializeOwned;

use crate::config::{PipelineConfig, ServerConfig};
use crate::error::Result;
use crate::event::{Category, RunLogEvent, TraceLogEvent};
use crate::store::TableWriter;
use crate::transport::{BusConsumer, BusRecord};
use crate::utils::{join_with_timeout, IntervalLimiter};

/// Queue-full warnings per lane are limited to one per interval.
const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(10);
/// Longest payload excerpt included in a parse failure warning.
const PAYLOAD_EXCERPT: usize = 256;

/// Counters shared by the pipeline stages.
#[derive(Debug, Default)]
pub struct PipelineCounters {
  received: AtomicU64,
  parse_failed: AtomicU64,
  dropped: AtomicU64,
  written: AtomicU64,
  write_failed: AtomicU64,
}

/// Snapshot of [`PipelineCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
  pub received: u64,
  pub parse_failed: u64,
  pub dropped: u64,
  pub written: u64,
  pub write_failed: u64,
}

impl PipelineCounters {
  pub fn snapshot(&self) -> PipelineStats {
    PipelineStats {
      received: self.received.load(Ordering::Relaxed),
      parse_failed: self.parse_failed.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      written: self.written.load(Ordering::Relaxed),
      write_failed: self.write_failed.load(Ordering::Relaxed),
    }
  }
}

fn excerpt(payload: &str) -> &str {
  match payload.char_indices().nth(PAYLOAD_EXCERPT) {
    Some((idx, _)) => &payload[..idx],
    None => payload,
  }
}

/// Parses raw records and offers them to the lane queue of their category.
pub struct Router {
  run: Sender<RunLogEvent>,
  trace: Sender<TraceLogEvent>,
  counters: Arc<PipelineCounters>,
  run_full: IntervalLimiter,
  trace_full: IntervalLimiter,
}

impl Router {
  pub fn new(
    run: Sender<RunLogEvent>,
    trace: Sender<TraceLogEvent>,
    counters: Arc<PipelineCounters>,
  ) -> Self {
    Self {
      run,
      trace,
      counters,
      run_full: IntervalLimiter::new(DROP_REPORT_INTERVAL),
      trace_full: IntervalLimiter::new(DROP_REPORT_INTERVAL),
    }
  }

  pub fn route(&self, records: Vec<BusRecord>) {
    for record in records {
      self.counters.received.fetch_add(1, Ordering::Relaxed);
      match Category::from_topic(&record.topic) {
        Category::Run => self.offer(Category::Run, &record.payload, &self.run, &self.run_full),
        Category::Trace => {
          self.offer(Category::Trace, &record.payload, &self.trace, &self.trace_full)
        },
      }
    }
  }

  fn offer<E: DeserializeOwned>(
    &self,
    category: Category,
    payload: &str,
    queue: &Sender<E>,
    limiter: &IntervalLimiter,
  ) {
    let event: E = match serde_json::from_str(payload) {
      Ok(event) => event,
      Err(e) => {
        self.counters.parse_failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
          category = %category,
          error = %e,
          payload = excerpt(payload),
          "cannot parse event, dropping"
        );
        return;
      },
    };

    if queue.try_send(event).is_err() {
      let total = self.counters.dropped.fetch_add(1, Ordering::Relaxed) + 1;
      if limiter.try_acquire() {
        tracing::warn!(category = %category, dropped_total = total, "lane queue full, dropping event");
      }
    }
  }
}

/// Drains one lane queue into its table writer.
pub struct BatchWriter<E> {
  category: Category,
  queue: Receiver<E>,
  writer: Arc<dyn TableWriter<E>>,
  batch_size: usize,
  batch_timeout: Duration,
  counters: Arc<PipelineCounters>,
}

impl<E: Send + 'static> BatchWriter<E> {
  pub fn new(
    category: Category,
    queue: Receiver<E>,
    writer: Arc<dyn TableWriter<E>>,
    config: &PipelineConfig,
    counters: Arc<PipelineCounters>,
  ) -> Self {
    Self {
      category,
      queue,
      writer,
      batch_size: config.batch_size.max(1),
      batch_timeout: config.batch_timeout(),
      counters,
    }
  }

  fn flush(&self, batch: &[E]) {
    match self.writer.batch_insert(batch) {
      Ok(()) => {
        self.counters.written.fetch_add(batch.len() as u64, Ordering::Relaxed);
      },
      Err(e) => {
        self.counters.write_failed.fetch_add(batch.len() as u64, Ordering::Relaxed);
        tracing::error!(category = %self.category, size = batch.len(), error = %e, "batch insert failed");
      },
    }
  }

  /// Loop until `stop` disconnects, then flush what is still queued.
  pub fn run(&self, stop: &Receiver<()>) {
    tracing::info!(
      category = %self.category,
      batch_size = self.batch_size,
      timeout_ms = self.batch_timeout.as_millis() as u64,
      "batch writer started"
    );
    let mut batch: Vec<E> = Vec::with_capacity(self.batch_size);

    loop {
      crossbeam_channel::select! {
        recv(self.queue) -> first => match first {
          Ok(first) => {
            batch.push(first);
            batch.extend(self.queue.try_iter().take(self.batch_size - 1));
          },
          Err(_) => break,
        },
        recv(stop) -> _ => break,
        default(self.batch_timeout) => {},
      }

      if !batch.is_empty() {
        self.flush(&batch);
        batch.clear();
      }
    }

    self.drain_remaining();
    tracing::info!(category = %self.category, "batch writer stopped");
  }

  fn drain_remaining(&self) {
    let remaining: Vec<E> = self.queue.try_iter().collect();
    if remaining.is_empty() {
      return;
    }
    tracing::info!(category = %self.category, remaining = remaining.len(), "flushing queued events before exit");
    for chunk in remaining.chunks(self.batch_size) {
      self.flush(chunk);
    }
  }
}

/// Bus polling loop feeding the [`Router`].
pub struct Poller<C: BusConsumer> {
  consumer: C,
  router: Router,
  poll_timeout: Duration,
}

impl<C: BusConsumer> Poller<C> {
  pub fn new(consumer: C, router: Router, poll_timeout: Duration) -> Self {
    Self {
      consumer,
      router,
      poll_timeout,
    }
  }

  /// Poll until `stop` disconnects. A failed poll is logged and retried after
  /// one poll interval.
  pub fn run(&mut self, stop: &Receiver<()>) {
    loop {
      if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
        break;
      }
      match self.consumer.poll(self.poll_timeout) {
        Ok(records) if records.is_empty() => {},
        Ok(records) => self.router.route(records),
        Err(e) => {
          tracing::error!(error = %e, "bus poll failed");
          if !matches!(stop.recv_timeout(self.poll_timeout), Err(RecvTimeoutError::Timeout)) {
            break;
          }
        },
      }
    }
    tracing::info!("bus poller stopped");
  }
}

/// Running server pipeline: one poller plus one writer per category.
pub struct ConsumerPipeline {
  poller_stop: Option<Sender<()>>,
  writer_stop: Option<Sender<()>>,
  poller: Option<JoinHandle<()>>,
  writers: Vec<JoinHandle<()>>,
  shutdown_timeout: Duration,
  counters: Arc<PipelineCounters>,
}

impl ConsumerPipeline {
  pub fn start<C: BusConsumer + 'static>(
    consumer: C,
    run_writer: Arc<dyn TableWriter<RunLogEvent>>,
    trace_writer: Arc<dyn TableWriter<TraceLogEvent>>,
    config: &ServerConfig,
  ) -> Result<Self> {
    let counters = Arc::new(PipelineCounters::default());
    let (run_tx, run_rx) = crossbeam_channel::bounded(config.run_log.queue_capacity.max(1));
    let (trace_tx, trace_rx) = crossbeam_channel::bounded(config.trace_log.queue_capacity.max(1));
    let (writer_stop, writer_stop_rx) = crossbeam_channel::bounded::<()>(0);
    let (poller_stop, poller_stop_rx) = crossbeam_channel::bounded::<()>(0);

    let run = BatchWriter::new(
      Category::Run,
      run_rx,
      run_writer,
      &config.run_log,
      Arc::clone(&counters),
    );
    let trace = BatchWriter::new(
      Category::Trace,
      trace_rx,
      trace_writer,
      &config.trace_log,
      Arc::clone(&counters),
    );

    let mut writers = Vec::with_capacity(2);
    let stop = writer_stop_rx.clone();
    writers.push(
      thread::Builder::new()
        .name("logix-run-writer".to_string())
        .spawn(move || run.run(&stop))?,
    );
    let stop = writer_stop_rx;
    writers.push(
      thread::Builder::new()
        .name("logix-trace-writer".to_string())
        .spawn(move || trace.run(&stop))?,
    );

    let router = Router::new(run_tx, trace_tx, Arc::clone(&counters));
    let mut poller = Poller::new(consumer, router, config.poll_timeout());
    let poller = thread::Builder::new()
      .name("logix-bus-poller".to_string())
      .spawn(move || poller.run(&poller_stop_rx))?;

    tracing::info!(
      run_capacity = config.run_log.queue_capacity,
      trace_capacity = config.trace_log.queue_capacity,
      "consumer pipeline started"
    );
    Ok(Self {
      poller_stop: Some(poller_stop),
      writer_stop: Some(writer_stop),
      poller: Some(poller),
      writers,
      shutdown_timeout: config.shutdown_timeout(),
      counters,
    })
  }

  pub fn stats(&self) -> PipelineStats {
    self.counters.snapshot()
  }

  /// Stop intake first, then let the writers flush what is queued.
  pub fn shutdown(&mut self) {
    if self.poller_stop.is_none() && self.writer_stop.is_none() {
      return;
    }
    tracing::info!("consumer pipeline shutting down");

    self.poller_stop.take();
    if let Some(poller) = self.poller.take() {
      join_with_timeout(vec![poller], self.shutdown_timeout);
    }

    self.writer_stop.take();
    let stuck = join_with_timeout(std::mem::take(&mut self.writers), self.shutdown_timeout);
    tracing::info!(stuck, stats = ?self.stats(), "consumer pipeline stopped");
  }
}

impl Drop for ConsumerPipeline {
  fn drop(&mut self) {
    self.shutdown();
  }
}
