
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Single-slot, time-expiring failure flag.
///
/// After [`record_failure`](Self::record_failure) the breaker reports blocked
/// for a flat quiet period, then heals by itself. There is no half-open probing
/// and no backoff growth.
///
/// The trip deadline is kept in one atomic (nanoseconds since `origin`, `0`
/// meaning healthy), so the hot `is_blocked` read never takes a lock.
#[derive(Debug)]
pub struct CircuitBreaker {
  origin: Instant,
  quiet_period: Duration,
  deadline_nanos: AtomicU64,
}

impl CircuitBreaker {
  pub fn new(quiet_period: Duration) -> Self {
    Self {
      origin: Instant::now(),
      quiet_period,
      deadline_nanos: AtomicU64::new(0),
    }
  }

  #[inline]
  fn elapsed_nanos(&self) -> u64 {
    self.origin.elapsed().as_nanos() as u64
  }

  /// `true` while a non-expired trip record exists.
  pub fn is_blocked(&self) -> bool {
    let deadline = self.deadline_nanos.load(Ordering::Acquire);
    if deadline == 0 {
      return false;
    }
    if self.elapsed_nanos() < deadline {
      return true;
    }
    // Expired: clear the slot unless a newer trip replaced it meanwhile.
    let _ = self
      .deadline_nanos
      .compare_exchange(deadline, 0, Ordering::AcqRel, Ordering::Relaxed);
    false
  }

  /// Trip the breaker for one quiet period starting now.
  pub fn record_failure(&self, reason: &str) {
    let deadline = self
      .elapsed_nanos()
      .saturating_add(self.quiet_period.as_nanos() as u64)
      .max(1);
    self.deadline_nanos.store(deadline, Ordering::Release);
    tracing::debug!(
      reason = reason,
      quiet_period_ms = self.quiet_period.as_millis() as u64,
      "circuit breaker tripped, entering quiet period"
    );
  }

  /// Time left in the current quiet period, if tripped.
  pub fn remaining(&self) -> Option<Duration> {
    let deadline = self.deadline_nanos.load(Ordering::Acquire);
    let now = self.elapsed_nanos();
    if deadline == 0 || now >= deadline {
      None
    } else {
      Some(Duration::from_nanos(deadline - now))
    }
  }

  pub fn quiet_period(&self) -> Duration {
    self.quiet_period
  }
}
