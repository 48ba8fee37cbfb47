use janitor_catalog::OperationId;
use serde::Serialize;

/// State of an engine across its runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
  Idle,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl RunState {
  pub fn is_terminal(self) -> bool {
    matches!(self, RunState::Completed | RunState::Failed | RunState::Cancelled)
  }
}

/// What a run accomplished before it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
  pub run_id: String,
  /// Operations that returned successfully, in execution order.
  pub completed: Vec<OperationId>,
}

/// Why a run failed.
///
/// Carries the single failing operation and the deepest cause of its error.
/// Operations completed before it are listed but not rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationFailure {
  pub run_id: String,
  pub operation_id: OperationId,
  /// Message of the innermost error in the chain.
  pub root_cause: String,
  /// Every message in the chain, outermost first.
  pub chain: Vec<String>,
  pub completed: Vec<OperationId>,
}

/// Terminal outcome of a run. Cancellation is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RunOutcome {
  Completed(RunSummary),
  Failed(OperationFailure),
  Cancelled(RunSummary),
}

impl RunOutcome {
  pub fn run_id(&self) -> &str {
    match self {
      RunOutcome::Completed(summary) | RunOutcome::Cancelled(summary) => &summary.run_id,
      RunOutcome::Failed(failure) => &failure.run_id,
    }
  }

  /// Operations that completed before the run ended.
  pub fn completed(&self) -> &[OperationId] {
    match self {
      RunOutcome::Completed(summary) | RunOutcome::Cancelled(summary) => &summary.completed,
      RunOutcome::Failed(failure) => &failure.completed,
    }
  }

  pub fn state(&self) -> RunState {
    match self {
      RunOutcome::Completed(_) => RunState::Completed,
      RunOutcome::Failed(_) => RunState::Failed,
      RunOutcome::Cancelled(_) => RunState::Cancelled,
    }
  }

  pub fn is_completed(&self) -> bool {
    matches!(self, RunOutcome::Completed(_))
  }

  pub fn is_cancelled(&self) -> bool {
    matches!(self, RunOutcome::Cancelled(_))
  }

  pub fn failure(&self) -> Option<&OperationFailure> {
    match self {
      RunOutcome::Failed(failure) => Some(failure),
      _ => None,
    }
  }
}
