//! Execution events and notifiers for observability.
//!
//! Events are emitted during a run to let callers observe progress, drive a
//! UI, persist history, etc.

use janitor_catalog::OperationId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Events emitted during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// The run has started and will execute `operations` in order.
  RunStarted {
    run_id: String,
    operations: Vec<OperationId>,
  },

  /// An operation has started. Its progress is indeterminate until it
  /// reports otherwise.
  OperationStarted {
    run_id: String,
    operation_id: OperationId,
  },

  /// An operation reported progress.
  OperationProgress {
    run_id: String,
    operation_id: OperationId,
    fraction: Option<f64>,
    message: Option<String>,
  },

  /// An operation has completed successfully.
  OperationCompleted {
    run_id: String,
    operation_id: OperationId,
  },

  /// An operation has failed. `error` is the root cause.
  OperationFailed {
    run_id: String,
    operation_id: OperationId,
    error: String,
  },

  /// Every operation in the plan completed.
  RunCompleted { run_id: String },

  /// The run stopped because an operation failed.
  RunFailed {
    run_id: String,
    operation_id: OperationId,
    error: String,
  },

  /// The run stopped because it was cancelled.
  RunCancelled { run_id: String },
}

impl ExecutionEvent {
  pub fn run_id(&self) -> &str {
    match self {
      ExecutionEvent::RunStarted { run_id, .. }
      | ExecutionEvent::OperationStarted { run_id, .. }
      | ExecutionEvent::OperationProgress { run_id, .. }
      | ExecutionEvent::OperationCompleted { run_id, .. }
      | ExecutionEvent::OperationFailed { run_id, .. }
      | ExecutionEvent::RunCompleted { run_id }
      | ExecutionEvent::RunFailed { run_id, .. }
      | ExecutionEvent::RunCancelled { run_id } => run_id,
    }
  }

  /// The operation this event concerns, if any.
  pub fn operation_id(&self) -> Option<&OperationId> {
    match self {
      ExecutionEvent::OperationStarted { operation_id, .. }
      | ExecutionEvent::OperationProgress { operation_id, .. }
      | ExecutionEvent::OperationCompleted { operation_id, .. }
      | ExecutionEvent::OperationFailed { operation_id, .. }
      | ExecutionEvent::RunFailed { operation_id, .. } => Some(operation_id),
      _ => None,
    }
  }

  /// Whether this is the last event of a run.
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      ExecutionEvent::RunCompleted { .. }
        | ExecutionEvent::RunFailed { .. }
        | ExecutionEvent::RunCancelled { .. }
    )
  }
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event, possibly from operation worker
/// tasks; implementations decide what to do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
///
/// The engine never waits on a slow consumer; progress volume is already
/// capped by throttling.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A notifier that writes every event to the `tracing` log.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl ExecutionNotifier for LogNotifier {
  fn notify(&self, event: ExecutionEvent) {
    match event {
      ExecutionEvent::RunStarted { run_id, operations } => {
        info!(run_id = %run_id, operations = operations.len(), "run_started");
      }
      ExecutionEvent::OperationStarted {
        run_id,
        operation_id,
      } => {
        info!(run_id = %run_id, operation_id = %operation_id, "operation_started");
      }
      ExecutionEvent::OperationProgress {
        run_id,
        operation_id,
        fraction,
        message,
      } => {
        info!(
          run_id = %run_id,
          operation_id = %operation_id,
          fraction = ?fraction,
          message = message.as_deref().unwrap_or_default(),
          "operation_progress"
        );
      }
      ExecutionEvent::OperationCompleted {
        run_id,
        operation_id,
      } => {
        info!(run_id = %run_id, operation_id = %operation_id, "operation_completed");
      }
      ExecutionEvent::OperationFailed {
        run_id,
        operation_id,
        error,
      } => {
        error!(run_id = %run_id, operation_id = %operation_id, error = %error, "operation_failed");
      }
      ExecutionEvent::RunCompleted { run_id } => info!(run_id = %run_id, "run_completed"),
      ExecutionEvent::RunFailed {
        run_id,
        operation_id,
        error,
      } => {
        error!(run_id = %run_id, operation_id = %operation_id, error = %error, "run_failed");
      }
      ExecutionEvent::RunCancelled { run_id } => warn!(run_id = %run_id, "run_cancelled"),
    }
  }
}
