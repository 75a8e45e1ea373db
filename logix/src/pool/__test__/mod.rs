#[cfg(test)]
mod __test__ {
  use crate::config::PoolConfig;
  use crate::error::{LogixError, Result};
  use crate::pool::TransportPool;
  use crate::transport::{BusProducer, TransportFactory};
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::thread;
  use std::time::{Duration, Instant};

  #[derive(Debug)]
  struct FakeHandle {
    id: usize,
    healthy: Arc<AtomicBool>,
  }

  impl BusProducer for FakeHandle {
    fn send(&mut self, _topic: &str, _payload: &str) -> Result<()> {
      Ok(())
    }

    fn is_healthy(&self) -> bool {
      self.healthy.load(Ordering::SeqCst)
    }
  }

  #[derive(Default)]
  struct FakeFactory {
    created: AtomicUsize,
    destroyed: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    fail_create: AtomicBool,
  }

  impl FakeFactory {
    fn healthy() -> Self {
      let factory = Self::default();
      factory.healthy.store(true, Ordering::SeqCst);
      factory
    }
  }

  impl TransportFactory for FakeFactory {
    type Handle = FakeHandle;

    fn create(&self) -> Result<FakeHandle> {
      if self.fail_create.load(Ordering::SeqCst) {
        return Err(LogixError::Transport("broker down".to_string()));
      }
      let id = self.created.fetch_add(1, Ordering::SeqCst);
      Ok(FakeHandle {
        id,
        healthy: Arc::clone(&self.healthy),
      })
    }

    fn destroy(&self, _handle: FakeHandle) {
      self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn config(min_idle: usize, max_idle: usize, max_total: usize, max_wait_ms: u64) -> PoolConfig {
    PoolConfig {
      min_idle,
      max_idle,
      max_total,
      max_wait_ms,
    }
  }

  #[test]
  fn test_handles_created_lazily_and_reused() {
    let pool = TransportPool::new(FakeFactory::healthy(), &config(0, 2, 4, 50));
    assert_eq!(pool.stats().total, 0);

    let handle = pool.borrow().unwrap();
    assert_eq!(handle.id, 0);
    assert_eq!(pool.stats().active, 1);

    pool.return_handle(handle);
    assert_eq!(pool.stats().idle, 1);

    let again = pool.borrow().unwrap();
    assert_eq!(again.id, 0);
    pool.return_handle(again);
  }

  #[test]
  fn test_min_idle_prefills() {
    let pool = TransportPool::new(FakeFactory::healthy(), &config(2, 4, 4, 50));
    let stats = pool.stats();
    assert_eq!(stats.idle, 2);
    assert_eq!(stats.total, 2);
  }

  #[test]
  fn test_exhaustion_fails_after_bounded_wait() {
    let pool = TransportPool::new(FakeFactory::healthy(), &config(0, 1, 1, 60));
    let held = pool.borrow().unwrap();

    let started = Instant::now();
    match pool.borrow() {
      Err(LogixError::PoolExhausted { waited_ms }) => assert!(waited_ms >= 50),
      other => panic!("expected PoolExhausted, got {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(55));
    assert!(started.elapsed() < Duration::from_secs(2));

    pool.return_handle(held);
  }

  #[test]
  fn test_waiting_borrower_receives_returned_handle() {
    let pool = Arc::new(TransportPool::new(
      FakeFactory::healthy(),
      &config(0, 1, 1, 2_000),
    ));
    let held = pool.borrow().unwrap();

    let waiter = {
      let pool = Arc::clone(&pool);
      thread::spawn(move || pool.borrow().map(|h| h.id))
    };

    thread::sleep(Duration::from_millis(50));
    pool.return_handle(held);

    assert_eq!(waiter.join().unwrap().unwrap(), 0);
  }

  #[test]
  fn test_invalidate_destroys_and_frees_slot() {
    let factory = FakeFactory::healthy();
    let destroyed = Arc::clone(&factory.destroyed);
    let pool = TransportPool::new(factory, &config(0, 1, 1, 20));

    let handle = pool.borrow().unwrap();
    pool.invalidate(handle);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().total, 0);

    let fresh = pool.borrow().unwrap();
    assert_eq!(fresh.id, 1);
    pool.return_handle(fresh);
  }

  #[test]
  fn test_returns_beyond_max_idle_are_destroyed() {
    let factory = FakeFactory::healthy();
    let destroyed = Arc::clone(&factory.destroyed);
    let pool = TransportPool::new(factory, &config(0, 1, 3, 20));

    let a = pool.borrow().unwrap();
    let b = pool.borrow().unwrap();
    pool.return_handle(a);
    pool.return_handle(b);

    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().idle, 1);
    assert_eq!(pool.stats().total, 1);
  }

  #[test]
  fn test_unhealthy_idle_handle_is_replaced() {
    let factory = FakeFactory::healthy();
    let healthy = Arc::clone(&factory.healthy);
    let destroyed = Arc::clone(&factory.destroyed);
    let pool = TransportPool::new(factory, &config(0, 2, 2, 20));

    let handle = pool.borrow().unwrap();
    pool.return_handle(handle);

    healthy.store(false, Ordering::SeqCst);
    // The stale idle handle is destroyed, a fresh one is created. The fresh one
    // shares the flag but is not validated on creation.
    let fresh = pool.borrow().unwrap();
    assert_eq!(fresh.id, 1);
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    pool.invalidate(fresh);
  }

  #[test]
  fn test_create_failure_releases_slot() {
    let factory = FakeFactory::healthy();
    factory.fail_create.store(true, Ordering::SeqCst);
    let pool = TransportPool::new(factory, &config(0, 1, 1, 20));

    assert!(matches!(pool.borrow(), Err(LogixError::Transport(_))));
    assert_eq!(pool.stats().total, 0);
  }

  #[test]
  fn test_close_refuses_borrows() {
    let factory = FakeFactory::healthy();
    let destroyed = Arc::clone(&factory.destroyed);
    let pool = TransportPool::new(factory, &config(2, 2, 2, 20));

    pool.close();
    assert_eq!(destroyed.load(Ordering::SeqCst), 2);
    assert!(pool.borrow().is_err());
  }
}
