//! # ID Generator
//!
//! Snowflake-style 64-bit ids for trace correlation:
//!
//! ```text
//! | 41 bits: millis since EPOCH | 5 bits: worker | 12 bits: sequence |
//! ```
//!
//! Ids from one generator are unique and strictly increasing. A clock that
//! moves backwards makes [`IdGenerator::next_id`] fail instead of risking a
//! duplicate.


#[cfg(test)]
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use rand::Rng;

use crate::error::{LogixError, Result};
use crate::net;
use crate::utils::now_millis;

/// 2025-09-01T00:00:00Z in epoch milliseconds.
pub const EPOCH: i64 = 1_756_656_000_000;

const WORKER_BITS: u32 = 5;
const SEQUENCE_BITS: u32 = 12;
const TIMESTAMP_BITS: u32 = 41;

pub const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;

const WORKER_SHIFT: u32 = SEQUENCE_BITS;
const TIMESTAMP_SHIFT: u32 = SEQUENCE_BITS + WORKER_BITS;

/// Millisecond time source.
pub trait Clock: Send + Sync {
  fn now_millis(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  #[inline]
  fn now_millis(&self) -> i64 {
    now_millis()
  }
}

/// A clock that only moves when told to.
#[cfg(test)]
#[derive(Debug)]
pub struct ManualClock {
  millis: AtomicI64,
}

#[cfg(test)]
impl ManualClock {
  pub fn new(millis: i64) -> Self {
    Self {
      millis: AtomicI64::new(millis),
    }
  }

  pub fn set(&self, millis: i64) {
    self.millis.store(millis, Ordering::SeqCst);
  }

  pub fn advance(&self, millis: i64) {
    self.millis.fetch_add(millis, Ordering::SeqCst);
  }
}

#[cfg(test)]
impl Clock for ManualClock {
  fn now_millis(&self) -> i64 {
    self.millis.load(Ordering::SeqCst)
  }
}

#[derive(Debug)]
struct IdState {
  last_timestamp: i64,
  sequence: u64,
}

#[derive(Debug)]
pub struct IdGenerator<C: Clock = SystemClock> {
  worker_id: u64,
  clock: C,
  state: Mutex<IdState>,
}

impl IdGenerator<SystemClock> {
  /// Generator on the system clock with a worker id derived from this host.
  pub fn new() -> Self {
    Self::with_clock(SystemClock, default_worker_id())
  }
}

impl Default for IdGenerator<SystemClock> {
  fn default() -> Self {
    Self::new()
  }
}

impl<C: Clock> IdGenerator<C> {
  /// `worker_id` is masked to its 5 bits.
  pub fn with_clock(clock: C, worker_id: u64) -> Self {
    Self {
      worker_id: worker_id & MAX_WORKER_ID,
      clock,
      state: Mutex::new(IdState {
        last_timestamp: -1,
        sequence: 0,
      }),
    }
  }

  pub fn worker_id(&self) -> u64 {
    self.worker_id
  }

  pub fn clock(&self) -> &C {
    &self.clock
  }

  pub fn next_id(&self) -> Result<u64> {
    let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut timestamp = self.clock.now_millis();

    if timestamp < state.last_timestamp {
      return Err(LogixError::ClockMovedBackwards {
        last: state.last_timestamp,
        current: timestamp,
      });
    }

    if timestamp == state.last_timestamp {
      state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
      if state.sequence == 0 {
        timestamp = self.wait_next_millis(state.last_timestamp);
      }
    } else {
      state.sequence = 0;
    }
    state.last_timestamp = timestamp;

    let relative = ((timestamp - EPOCH).max(0) as u64) & TIMESTAMP_MASK;
    Ok((relative << TIMESTAMP_SHIFT) | (self.worker_id << WORKER_SHIFT) | state.sequence)
  }

  /// Next id rendered as uppercase hex, the form carried in `traceId`.
  pub fn next_trace_id(&self) -> Result<String> {
    Ok(format!("{:X}", self.next_id()?))
  }

  fn wait_next_millis(&self, last: i64) -> i64 {
    loop {
      let now = self.clock.now_millis();
      if now > last {
        return now;
      }
      std::hint::spin_loop();
    }
  }
}

/// Worker id from the host's hardware address, random when there is none.
pub fn default_worker_id() -> u64 {
  match net::hardware_address() {
    Some(mac) => worker_id_from_address(&mac),
    None => {
      let id = rand::rng().random_range(0..=MAX_WORKER_ID);
      tracing::warn!(worker_id = id, "no hardware address found, using a random worker id");
      id
    },
  }
}

/// FNV-1a over the address bytes, folded into the worker id range.
pub fn worker_id_from_address(address: &[u8]) -> u64 {
  let hash = address
    .iter()
    .fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
      (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    });
  hash % (MAX_WORKER_ID + 1)
}

/// Eight uppercase hex chars from the thread-local CSPRNG. Not time ordered.
pub fn span_id() -> String {
  let value: u32 = rand::rng().random();
  format!("{:08X}", value)
}

/// Epoch millis embedded in a hex trace id.
pub fn parse_timestamp(trace_id: &str) -> Option<i64> {
  let id = u64::from_str_radix(trace_id.trim(), 16).ok()?;
  Some(timestamp_of(id))
}

/// Epoch millis embedded in a raw id.
pub fn timestamp_of(id: u64) -> i64 {
  ((id >> TIMESTAMP_SHIFT) & TIMESTAMP_MASK) as i64 + EPOCH
}
