//! # Transport Pool
//!
//! Bounded pool of bus producer handles.
//!
//! - Handles are created lazily through a [`TransportFactory`], up to `max_total`.
//! - At most `max_idle` handles are kept when returned; extras are destroyed.
//! - `borrow` waits at most `max_wait` for a handle, then fails fast with
//!   [`LogixError::PoolExhausted`]. Callers treat that as a transient failure.
//! - A handle whose send failed is [`invalidate`](TransportPool::invalidate)d
//!   instead of returned, which destroys it and frees its slot.

mod __test__;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{LogixError, Result};
use crate::transport::TransportFactory;

#[derive(Debug)]
struct PoolState<H> {
  idle: VecDeque<H>,
  /// Live handles: idle plus borrowed.
  total: usize,
  closed: bool,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
  pub idle: usize,
  pub active: usize,
  pub total: usize,
}

pub struct TransportPool<F: TransportFactory> {
  factory: F,
  min_idle: usize,
  max_idle: usize,
  max_total: usize,
  max_wait: Duration,
  state: Mutex<PoolState<F::Handle>>,
  available: Condvar,
}

impl<F: TransportFactory> std::fmt::Debug for TransportPool<F> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TransportPool")
      .field("max_idle", &self.max_idle)
      .field("max_total", &self.max_total)
      .field("max_wait", &self.max_wait)
      .field("stats", &self.stats())
      .finish()
  }
}

impl<F: TransportFactory> TransportPool<F> {
  /// Build the pool and pre-create `min_idle` handles.
  ///
  /// Pre-creation failures are logged, not fatal: handles are created on demand
  /// later anyway.
  pub fn new(factory: F, config: &PoolConfig) -> Self {
    let max_total = config.max_total.max(1);
    let pool = Self {
      factory,
      min_idle: config.min_idle.min(max_total),
      max_idle: config.max_idle.min(max_total),
      max_total,
      max_wait: Duration::from_millis(config.max_wait_ms),
      state: Mutex::new(PoolState {
        idle: VecDeque::new(),
        total: 0,
        closed: false,
      }),
      available: Condvar::new(),
    };
    pool.fill_min_idle();
    pool
  }

  fn lock(&self) -> MutexGuard<'_, PoolState<F::Handle>> {
    // A panic while holding the lock cannot leave the counters half-updated,
    // so a poisoned guard is still usable.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn fill_min_idle(&self) {
    for _ in 0..self.min_idle {
      {
        let mut state = self.lock();
        if state.total >= self.max_total {
          return;
        }
        state.total += 1;
      }
      match self.factory.create() {
        Ok(handle) => self.lock().idle.push_back(handle),
        Err(e) => {
          self.release_slot();
          tracing::warn!(error = %e, "failed to pre-create transport handle");
          return;
        },
      }
    }
  }

  fn release_slot(&self) {
    let mut state = self.lock();
    state.total = state.total.saturating_sub(1);
    drop(state);
    self.available.notify_one();
  }

  /// Borrow a handle, waiting at most `max_wait`.
  pub fn borrow(&self) -> Result<F::Handle> {
    let started = Instant::now();
    let deadline = started + self.max_wait;
    let mut state = self.lock();

    loop {
      if state.closed {
        return Err(LogixError::Transport("transport pool is closed".to_string()));
      }

      if let Some(handle) = state.idle.pop_front() {
        drop(state);
        if self.factory.validate(&handle) {
          return Ok(handle);
        }
        tracing::debug!("discarding idle transport handle that failed validation");
        self.factory.destroy(handle);
        self.release_slot();
        state = self.lock();
        continue;
      }

      if state.total < self.max_total {
        state.total += 1;
        drop(state);
        return match self.factory.create() {
          Ok(handle) => Ok(handle),
          Err(e) => {
            self.release_slot();
            Err(e)
          },
        };
      }

      let now = Instant::now();
      if now >= deadline {
        return Err(LogixError::PoolExhausted {
          waited_ms: started.elapsed().as_millis() as u64,
        });
      }
      let (guard, _timeout) = self
        .available
        .wait_timeout(state, deadline - now)
        .unwrap_or_else(|poisoned| poisoned.into_inner());
      state = guard;
    }
  }

  /// Give a healthy handle back. Handles beyond `max_idle` are destroyed.
  pub fn return_handle(&self, handle: F::Handle) {
    let mut state = self.lock();
    if state.closed || state.idle.len() >= self.max_idle {
      state.total = state.total.saturating_sub(1);
      drop(state);
      self.factory.destroy(handle);
      self.available.notify_one();
      return;
    }
    state.idle.push_back(handle);
    drop(state);
    self.available.notify_one();
  }

  /// Discard a handle that failed; it is destroyed and its slot freed.
  pub fn invalidate(&self, handle: F::Handle) {
    self.factory.destroy(handle);
    self.release_slot();
  }

  pub fn stats(&self) -> PoolStats {
    let state = self.lock();
    PoolStats {
      idle: state.idle.len(),
      active: state.total - state.idle.len(),
      total: state.total,
    }
  }

  /// Destroy idle handles and refuse further borrows. Borrowed handles are
  /// destroyed when they come back.
  pub fn close(&self) {
    let drained: Vec<F::Handle> = {
      let mut state = self.lock();
      state.closed = true;
      let drained: Vec<_> = state.idle.drain(..).collect();
      state.total -= drained.len();
      drained
    };
    for handle in drained {
      self.factory.destroy(handle);
    }
    self.available.notify_all();
  }
}

impl<F: TransportFactory> Drop for TransportPool<F> {
  fn drop(&mut self) {
    self.close();
  }
}
