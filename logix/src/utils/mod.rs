mod __test__;

use std::sync::atomic::{AtomicI64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;

/// Wall-clock time in epoch milliseconds.
#[inline]
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// Name of the current thread, or its id when unnamed.
pub fn current_thread_name() -> String {
  let current = std::thread::current();
  match current.name() {
    Some(name) => name.to_string(),
    None => format!("{:?}", current.id()),
  }
}

/// Lets at most one caller through per interval.
#[derive(Debug)]
pub struct IntervalLimiter {
  interval_ms: i64,
  last: AtomicI64,
}

impl IntervalLimiter {
  pub fn new(interval: Duration) -> Self {
    Self {
      interval_ms: interval.as_millis() as i64,
      last: AtomicI64::new(i64::MIN),
    }
  }

  pub fn try_acquire(&self) -> bool {
    self.try_acquire_at(now_millis())
  }

  pub fn try_acquire_at(&self, now_ms: i64) -> bool {
    let last = self.last.load(Ordering::Relaxed);
    if last != i64::MIN && now_ms.saturating_sub(last) < self.interval_ms {
      return false;
    }
    self
      .last
      .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Relaxed)
      .is_ok()
  }
}

/// Join worker threads, giving up on the ones still running at the deadline.
///
/// Threads that miss the deadline are detached. Returns how many were left.
pub fn join_with_timeout(handles: Vec<JoinHandle<()>>, timeout: Duration) -> usize {
  let deadline = Instant::now() + timeout;
  let mut pending = handles;

  loop {
    let (finished, running): (Vec<_>, Vec<_>) =
      pending.into_iter().partition(|handle| handle.is_finished());
    for handle in finished {
      let name = handle.thread().name().unwrap_or("unnamed").to_string();
      if handle.join().is_err() {
        tracing::error!(thread = %name, "worker thread panicked");
      }
    }
    pending = running;

    if pending.is_empty() {
      return 0;
    }
    if Instant::now() >= deadline {
      for handle in &pending {
        tracing::warn!(
          thread = handle.thread().name().unwrap_or("unnamed"),
          "worker did not stop in time, detaching"
        );
      }
      return pending.len();
    }
    std::thread::sleep(Duration::from_millis(10));
  }
}
