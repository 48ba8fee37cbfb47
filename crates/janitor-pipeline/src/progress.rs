use std::sync::{Mutex, PoisonError};

type Callback = Box<dyn Fn(f64) + Send + Sync>;

struct Counter {
  done: u64,
}

/// Folds completions from parallel workers into a single fraction.
///
/// Every [`add`](Self::add) increments the shared counter and reports
/// `done / total` while still holding the lock, so observers never see the
/// fraction go backwards.
pub struct ProgressAggregator {
  total: u64,
  counter: Mutex<Counter>,
  callback: Callback,
}

impl ProgressAggregator {
  pub fn new<F>(total: u64, callback: F) -> Self
  where
    F: Fn(f64) + Send + Sync + 'static,
  {
    Self {
      total,
      counter: Mutex::new(Counter { done: 0 }),
      callback: Box::new(callback),
    }
  }

  /// Record `n` more completed units and report the new fraction.
  pub fn add(&self, n: u64) {
    let mut counter = self.counter.lock().unwrap_or_else(PoisonError::into_inner);
    counter.done = counter.done.saturating_add(n);
    (self.callback)(fraction(counter.done, self.total));
  }

  pub fn total(&self) -> u64 {
    self.total
  }

  pub fn completed(&self) -> u64 {
    self.counter.lock().unwrap_or_else(PoisonError::into_inner).done
  }
}

impl std::fmt::Debug for ProgressAggregator {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ProgressAggregator")
      .field("total", &self.total)
      .field("completed", &self.completed())
      .finish()
  }
}

fn fraction(done: u64, total: u64) -> f64 {
  if total == 0 {
    return 1.0;
  }
  (done as f64 / total as f64).clamp(0.0, 1.0)
}
