//! # Client dispatch pipeline
//!
//! Applications hand serialized events to a [`LogEventDispatcher`], which never
//! blocks them. Each category has its own bounded [`QueueChannel`]; worker
//! threads drain the channels in batches and ship them through a pooled bus
//! transport.
//!
//! ## Batch trigger
//!
//! A worker flushes when the channel holds a full batch or when the last flush
//! is older than the batch timeout. On an empty channel it blocks for the next
//! item and ships whatever has accumulated behind it. Otherwise it naps for
//! [`IDLE_POLL_INTERVAL`] and checks again.
//!
//! ## Failure handling
//!
//! Delivery is at-most-once. A batch is discarded when the circuit breaker is
//! tripped; a failed send invalidates the transport handle and trips the
//! breaker. Nothing is retried or re-queued.


use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::bus::TcpTransportFactory;
use crate::circuit::CircuitBreaker;
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::event::{Category, LogEvent, RunLogEvent, TraceLogEvent};
use crate::pool::{PoolStats, TransportPool};
use crate::transport::{BusProducer, TransportFactory};
use crate::utils::{join_with_timeout, IntervalLimiter};

/// Nap between checks while a channel holds less than a batch.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Pause after a panic in the send path before the worker resumes.
pub const ERROR_PAUSE: Duration = Duration::from_millis(1_000);
/// Queue-full diagnostics are emitted at most once per interval.
pub const DROP_REPORT_INTERVAL: Duration = Duration::from_secs(10);
/// Bound on joining workers in [`LogEventDispatcher::close`].
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded FIFO of wire-ready payloads for one category.
#[derive(Debug)]
pub struct QueueChannel {
  category: Category,
  sender: Sender<String>,
  receiver: Receiver<String>,
  batch_size: usize,
  batch_timeout: Duration,
  last_flush: Mutex<Instant>,
  drop_report: IntervalLimiter,
  dropped: AtomicU64,
}

impl QueueChannel {
  pub fn new(category: Category, capacity: usize, batch_size: usize, batch_timeout: Duration) -> Self {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    Self {
      category,
      sender,
      receiver,
      batch_size: batch_size.max(1),
      batch_timeout,
      last_flush: Mutex::new(Instant::now()),
      drop_report: IntervalLimiter::new(DROP_REPORT_INTERVAL),
      dropped: AtomicU64::new(0),
    }
  }

  pub fn category(&self) -> Category {
    self.category
  }

  pub fn len(&self) -> usize {
    self.receiver.len()
  }

  pub fn is_empty(&self) -> bool {
    self.receiver.is_empty()
  }

  /// Payloads rejected because the channel was full.
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  /// Enqueue without blocking. Returns `false` when the payload was dropped.
  pub fn publish(&self, payload: String) -> bool {
    match self.sender.try_send(payload) {
      Ok(()) => true,
      Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if self.drop_report.try_acquire() {
          tracing::debug!(
            category = %self.category,
            dropped_total = total,
            "queue full, dropping logs"
          );
        }
        false
      },
    }
  }

  fn last_flush(&self) -> Instant {
    *self.last_flush.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn mark_flushed(&self, at: Instant) {
    *self.last_flush.lock().unwrap_or_else(|p| p.into_inner()) = at;
  }

  fn drain_into(&self, batch: &mut Vec<String>, max: usize) {
    batch.extend(self.receiver.try_iter().take(max));
  }

  /// Worker loop. Runs until `stop` is disconnected, handing each non-empty
  /// batch to `sink`. A panicking sink pauses the worker instead of killing it.
  pub fn consume<S>(&self, stop: &Receiver<()>, mut sink: S)
  where
    S: FnMut(Category, &[String]),
  {
    let mut batch: Vec<String> = Vec::with_capacity(self.batch_size);

    loop {
      if matches!(stop.try_recv(), Err(TryRecvError::Disconnected)) {
        break;
      }
      batch.clear();

      let now = Instant::now();
      let elapsed = now.duration_since(self.last_flush());
      let size = self.receiver.len();

      if size >= self.batch_size || elapsed > self.batch_timeout {
        self.drain_into(&mut batch, self.batch_size);
      } else if size == 0 {
        crossbeam_channel::select! {
          recv(self.receiver) -> item => match item {
            Ok(payload) => {
              batch.push(payload);
              self.drain_into(&mut batch, self.batch_size - 1);
            },
            Err(_) => break,
          },
          recv(stop) -> _ => break,
        }
      } else {
        // Below a batch and not stale yet: the flush timestamp stays put so the
        // timeout still bounds how long these items wait.
        match stop.recv_timeout(IDLE_POLL_INTERVAL) {
          Err(RecvTimeoutError::Timeout) => continue,
          _ => break,
        }
      }

      if !batch.is_empty() {
        let sent = panic::catch_unwind(AssertUnwindSafe(|| sink(self.category, &batch)));
        if sent.is_err() {
          tracing::error!(category = %self.category, "batch sender panicked, pausing worker");
          if !matches!(stop.recv_timeout(ERROR_PAUSE), Err(RecvTimeoutError::Timeout)) {
            break;
          }
        }
      }
      self.mark_flushed(now);
    }
  }
}

/// Anything that accepts events for shipping.
pub trait LogSink: Send + Sync {
  /// Returns `false` when the event was dropped.
  fn submit(&self, event: LogEvent) -> bool;
}

/// Counters exposed by [`LogEventDispatcher::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
  /// Payloads accepted into a channel.
  pub published: u64,
  /// Payloads rejected by a full channel.
  pub dropped: u64,
  /// Payloads handed to the bus.
  pub sent: u64,
  /// Payloads lost to the breaker or a failed send.
  pub discarded: u64,
}

#[derive(Debug, Default)]
struct Counters {
  published: AtomicU64,
  sent: AtomicU64,
  discarded: AtomicU64,
}

struct Shared<F: TransportFactory> {
  run: QueueChannel,
  trace: QueueChannel,
  breaker: CircuitBreaker,
  pool: TransportPool<F>,
  counters: Counters,
}

impl<F: TransportFactory> Shared<F> {
  fn channel(&self, category: Category) -> &QueueChannel {
    match category {
      Category::Run => &self.run,
      Category::Trace => &self.trace,
    }
  }

  fn send_batch(&self, category: Category, batch: &[String]) {
    let count = batch.len() as u64;
    if self.breaker.is_blocked() {
      self.counters.discarded.fetch_add(count, Ordering::Relaxed);
      return;
    }

    let mut handle = match self.pool.borrow() {
      Ok(handle) => handle,
      Err(e) => {
        self.counters.discarded.fetch_add(count, Ordering::Relaxed);
        self.breaker.record_failure(&e.to_string());
        return;
      },
    };

    let topic = category.topic();
    let result = batch
      .iter()
      .try_for_each(|payload| handle.send(topic, payload))
      .and_then(|_| handle.flush());

    match result {
      Ok(()) => {
        self.pool.return_handle(handle);
        self.counters.sent.fetch_add(count, Ordering::Relaxed);
      },
      Err(e) => {
        self.pool.invalidate(handle);
        self.counters.discarded.fetch_add(count, Ordering::Relaxed);
        self.breaker.record_failure(&e.to_string());
      },
    }
  }
}

/// Client entry point: per-category channels plus their worker threads.
pub struct LogEventDispatcher<F: TransportFactory = TcpTransportFactory> {
  shared: Arc<Shared<F>>,
  stop: Mutex<Option<Sender<()>>>,
  workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LogEventDispatcher<TcpTransportFactory> {
  /// Dispatcher shipping to the TCP bus at `config.bootstrap_servers`.
  pub fn new(config: DispatcherConfig) -> Result<Self> {
    let factory = TcpTransportFactory::new(
      config.bootstrap_servers.clone(),
      config.credentials.clone().filter(|c| c.is_enabled()),
    );
    Self::with_factory(config, factory)
  }
}

impl<F: TransportFactory> LogEventDispatcher<F> {
  pub fn with_factory(config: DispatcherConfig, factory: F) -> Result<Self> {
    config.validate()?;

    let channel = |category| {
      QueueChannel::new(
        category,
        config.queue_capacity,
        config.batch_size,
        config.batch_timeout(),
      )
    };
    let shared = Arc::new(Shared {
      run: channel(Category::Run),
      trace: channel(Category::Trace),
      breaker: CircuitBreaker::new(config.quiet_period()),
      pool: TransportPool::new(factory, &config.pool),
      counters: Counters::default(),
    });

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
    let mut workers = Vec::with_capacity(config.worker_count * Category::ALL.len());
    for category in Category::ALL {
      for index in 0..config.worker_count {
        let shared = Arc::clone(&shared);
        let stop = stop_rx.clone();
        let name = format!("logix-{}-worker-{}", category.as_str().to_lowercase(), index);
        let handle = thread::Builder::new().name(name).spawn(move || {
          shared
            .channel(category)
            .consume(&stop, |category, batch| shared.send_batch(category, batch));
        })?;
        workers.push(handle);
      }
    }

    tracing::debug!(
      workers = workers.len(),
      batch_size = config.batch_size,
      "log dispatcher started"
    );
    Ok(Self {
      shared,
      stop: Mutex::new(Some(stop_tx)),
      workers: Mutex::new(workers),
    })
  }

  /// Serialize and route by category. Returns `false` if the event was dropped.
  pub fn publish(&self, event: &LogEvent) -> bool {
    match event.to_json() {
      Ok(payload) => self.publish_payload(event.category(), payload),
      Err(e) => {
        tracing::warn!(error = %e, "cannot serialize log event");
        false
      },
    }
  }

  pub fn publish_run_log(&self, event: RunLogEvent) -> bool {
    self.publish(&LogEvent::Run(event))
  }

  pub fn publish_trace_log(&self, event: TraceLogEvent) -> bool {
    self.publish(&LogEvent::Trace(event))
  }

  /// Enqueue an already serialized payload.
  pub fn publish_payload(&self, category: Category, payload: String) -> bool {
    let accepted = self.shared.channel(category).publish(payload);
    if accepted {
      self.shared.counters.published.fetch_add(1, Ordering::Relaxed);
    }
    accepted
  }

  pub fn stats(&self) -> DispatcherStats {
    let counters = &self.shared.counters;
    DispatcherStats {
      published: counters.published.load(Ordering::Relaxed),
      dropped: self.shared.run.dropped() + self.shared.trace.dropped(),
      sent: counters.sent.load(Ordering::Relaxed),
      discarded: counters.discarded.load(Ordering::Relaxed),
    }
  }

  pub fn pool_stats(&self) -> PoolStats {
    self.shared.pool.stats()
  }

  pub fn circuit_breaker(&self) -> &CircuitBreaker {
    &self.shared.breaker
  }

  /// Items waiting in the channel of `category`.
  pub fn pending(&self, category: Category) -> usize {
    self.shared.channel(category).len()
  }

  /// Stop the workers after their current iteration and release the pool.
  /// Still-queued payloads are not flushed.
  pub fn close(&self) {
    let stop = self.stop.lock().unwrap_or_else(|p| p.into_inner()).take();
    if stop.is_none() {
      return;
    }
    drop(stop);

    let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
    let stuck = join_with_timeout(workers, CLOSE_TIMEOUT);
    self.shared.pool.close();
    tracing::debug!(stuck, stats = ?self.stats(), "log dispatcher closed");
  }
}

impl<F: TransportFactory> LogSink for LogEventDispatcher<F> {
  fn submit(&self, event: LogEvent) -> bool {
    self.publish(&event)
  }
}

impl<F: TransportFactory> Drop for LogEventDispatcher<F> {
  fn drop(&mut self) {
    self.close();
  }
}
