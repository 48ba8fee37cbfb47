//! Pipeline errors.

use tokio::task::JoinError;

/// Boxed error returned by item handlers, converters and generators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while producing or consuming items.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  /// The cancellation token fired before the stage finished.
  #[error("pipeline cancelled")]
  Cancelled,

  /// An item was offered to a producer that was already completed.
  #[error("producer is complete and accepts no more items")]
  Closed,

  /// A producer was created with zero capacity.
  #[error("producer capacity must be at least 1")]
  InvalidCapacity,

  /// An item handler or converter failed.
  #[error("item handler failed")]
  Handler {
    #[source]
    source: BoxError,
  },

  /// A generation routine feeding a producer failed.
  #[error("generator worker {worker} failed")]
  Generator {
    worker: usize,
    #[source]
    source: BoxError,
  },

  /// A worker task panicked.
  #[error("pipeline worker panicked: {message}")]
  WorkerPanicked { message: String },
}

impl PipelineError {
  /// Wrap a handler failure.
  ///
  /// A handler that failed only because it observed cancellation (for example
  /// while enqueueing into the next stage) is reported as [`PipelineError::Cancelled`].
  pub fn handler(source: BoxError) -> Self {
    match source.downcast::<PipelineError>() {
      Ok(inner) if matches!(*inner, PipelineError::Cancelled) => PipelineError::Cancelled,
      Ok(inner) => PipelineError::Handler { source: inner },
      Err(source) => PipelineError::Handler { source },
    }
  }

  /// Wrap a generator failure for the given worker.
  pub fn generator(worker: usize, source: BoxError) -> Self {
    match source.downcast::<PipelineError>() {
      Ok(inner) if matches!(*inner, PipelineError::Cancelled) => PipelineError::Cancelled,
      Ok(inner) => PipelineError::Generator {
        worker,
        source: inner,
      },
      Err(source) => PipelineError::Generator { worker, source },
    }
  }

  /// Whether this error only reports cancellation.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, PipelineError::Cancelled)
  }
}

impl From<JoinError> for PipelineError {
  fn from(err: JoinError) -> Self {
    if err.is_cancelled() {
      return PipelineError::Cancelled;
    }

    let payload = err.into_panic();
    let message = payload
      .downcast_ref::<&str>()
      .map(|s| s.to_string())
      .or_else(|| payload.downcast_ref::<String>().cloned())
      .unwrap_or_else(|| "unknown panic".to_string());

    PipelineError::WorkerPanicked { message }
  }
}
