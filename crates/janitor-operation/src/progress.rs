use std::fmt;
use std::sync::Arc;

use janitor_pipeline::ProgressAggregator;

/// One progress report from an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
  /// Completed fraction in `[0, 1]`. `None` means indeterminate.
  pub fraction: Option<f64>,
  pub message: Option<String>,
}

impl ProgressUpdate {
  pub fn fraction(fraction: f64) -> Self {
    Self {
      fraction: Some(fraction),
      message: None,
    }
  }
}

type Sink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Cloneable handle an operation (or any of its worker tasks) reports
/// progress through.
#[derive(Clone)]
pub struct ProgressReporter {
  sink: Sink,
}

impl ProgressReporter {
  pub fn new<F>(sink: F) -> Self
  where
    F: Fn(ProgressUpdate) + Send + Sync + 'static,
  {
    Self {
      sink: Arc::new(sink),
    }
  }

  /// A reporter that drops every update.
  pub fn discard() -> Self {
    Self::new(|_| {})
  }

  /// Report progress. Fractions outside `[0, 1]` are clamped; NaN is
  /// reported as indeterminate.
  pub fn report(&self, fraction: Option<f64>, message: Option<String>) {
    let fraction = fraction.filter(|f| !f.is_nan()).map(|f| f.clamp(0.0, 1.0));
    (self.sink)(ProgressUpdate { fraction, message });
  }

  /// An aggregator over `total` units of work that reports through this
  /// reporter, for operations that split a fixed workload across workers.
  pub fn aggregator(&self, total: u64) -> ProgressAggregator {
    let reporter = self.clone();
    ProgressAggregator::new(total, move |fraction| reporter.report(Some(fraction), None))
  }
}

impl fmt::Debug for ProgressReporter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ProgressReporter").finish_non_exhaustive()
  }
}
