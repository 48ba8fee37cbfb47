use tokio_util::sync::CancellationToken;

use crate::error::OperationError;
use crate::id::OperationId;
use crate::progress::ProgressReporter;
use crate::resources::RunResources;

/// Everything an operation receives when it is executed.
///
/// `S` is the caller's bundle of external collaborators (data store,
/// file transformers, ...). It is cloned into every context, so it is
/// usually a set of `Arc`s.
#[derive(Debug, Clone)]
pub struct OperationContext<S> {
  operation_id: OperationId,
  run_id: String,
  cancel: CancellationToken,
  reporter: ProgressReporter,
  resources: RunResources,
  services: S,
}

impl<S> OperationContext<S> {
  /// Create a standalone context: never cancelled, progress discarded.
  pub fn new(operation_id: OperationId, run_id: impl Into<String>, services: S) -> Self {
    Self {
      operation_id,
      run_id: run_id.into(),
      cancel: CancellationToken::new(),
      reporter: ProgressReporter::discard(),
      resources: RunResources::new(),
      services,
    }
  }

  pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
    self.reporter = reporter;
    self
  }

  pub fn with_resources(mut self, resources: RunResources) -> Self {
    self.resources = resources;
    self
  }

  pub fn operation_id(&self) -> &OperationId {
    &self.operation_id
  }

  pub fn run_id(&self) -> &str {
    &self.run_id
  }

  /// The run-wide cancellation token.
  pub fn cancel(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  /// Fail with [`OperationError::Cancelled`] if the run was cancelled.
  ///
  /// Meant for the top of every processing loop.
  pub fn checkpoint(&self) -> Result<(), OperationError> {
    if self.cancel.is_cancelled() {
      return Err(OperationError::Cancelled);
    }
    Ok(())
  }

  /// Report progress. `None` means indeterminate.
  pub fn report(&self, fraction: Option<f64>, message: Option<String>) {
    self.reporter.report(fraction, message);
  }

  /// Report a status message without a fraction.
  pub fn status(&self, message: impl Into<String>) {
    self.reporter.report(None, Some(message.into()));
  }

  /// A reporter handle for worker tasks.
  pub fn reporter(&self) -> ProgressReporter {
    self.reporter.clone()
  }

  pub fn services(&self) -> &S {
    &self.services
  }

  pub fn resources(&self) -> &RunResources {
    &self.resources
  }
}
