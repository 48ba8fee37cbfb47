use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Rate limiter for progress events.
///
/// Admits an update only if at least the minimum interval has passed since
/// the last admitted one. Rejected updates are dropped, never queued.
#[derive(Debug)]
pub struct ProgressThrottle {
  min_interval: Duration,
  last: Mutex<Option<Instant>>,
}

impl ProgressThrottle {
  /// Allow at most `max_per_second` updates per second. Zero disables
  /// throttling.
  pub fn per_second(max_per_second: u32) -> Self {
    let min_interval = match max_per_second {
      0 => Duration::ZERO,
      n => Duration::from_secs(1) / n,
    };
    Self::with_interval(min_interval)
  }

  pub fn with_interval(min_interval: Duration) -> Self {
    Self {
      min_interval,
      last: Mutex::new(None),
    }
  }

  pub fn min_interval(&self) -> Duration {
    self.min_interval
  }

  /// Whether an update arriving now may be forwarded.
  pub fn admit(&self) -> bool {
    let now = Instant::now();
    let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
    match *last {
      Some(previous) if now.duration_since(previous) < self.min_interval => false,
      _ => {
        *last = Some(now);
        true
      }
    }
  }
}
