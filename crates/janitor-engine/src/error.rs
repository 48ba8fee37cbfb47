use janitor_catalog::OperationId;
use thiserror::Error;

/// Errors from misusing the engine.
///
/// Operation failures and cancellation are reported through
/// [`RunOutcome`](crate::RunOutcome), not here.
#[derive(Debug, Error)]
pub enum EngineError {
  /// A run is already active on this engine.
  #[error("a run is already in progress")]
  AlreadyRunning,

  /// The plan names an operation that is not registered.
  #[error("operation '{operation_id}' is not registered")]
  UnknownOperation { operation_id: OperationId },

  /// The task driving a spawned run was aborted or panicked.
  #[error("run task aborted: {message}")]
  RunAborted { message: String },
}
