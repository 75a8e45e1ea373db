#[cfg(test)]
mod __test__ {
  use crate::utils::{join_with_timeout, IntervalLimiter};
  use std::thread;
  use std::time::Duration;

  #[test]
  fn test_interval_limiter_allows_one_per_interval() {
    let limiter = IntervalLimiter::new(Duration::from_secs(10));
    assert!(limiter.try_acquire_at(1_000));
    assert!(!limiter.try_acquire_at(1_001));
    assert!(!limiter.try_acquire_at(10_999));
    assert!(limiter.try_acquire_at(11_000));
  }

  #[test]
  fn test_join_with_timeout_joins_finished_threads() {
    let handles = (0..3)
      .map(|_| thread::spawn(|| thread::sleep(Duration::from_millis(20))))
      .collect();
    assert_eq!(join_with_timeout(handles, Duration::from_secs(2)), 0);
  }

  #[test]
  fn test_join_with_timeout_detaches_stuck_threads() {
    let (_tx, rx) = crossbeam_channel::bounded::<()>(0);
    let stuck = thread::spawn(move || {
      let _ = rx.recv_timeout(Duration::from_secs(5));
    });
    assert_eq!(join_with_timeout(vec![stuck], Duration::from_millis(50)), 1);
  }
}
