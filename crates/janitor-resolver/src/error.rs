use janitor_catalog::OperationId;
use thiserror::Error;

/// Errors that can occur while building an execution plan.
///
/// All of them are reported before anything executes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
  /// The same operation appears more than once in the input.
  #[error("duplicate operation id: {id}")]
  DuplicateOperation { id: OperationId },

  /// Two selected operations exclude each other.
  #[error("operations '{first}' and '{second}' conflict; deselect one of them")]
  Conflict {
    first: OperationId,
    second: OperationId,
  },

  /// The "run after" constraints form a cycle.
  #[error("cyclic dependency: {}", format_cycle(.cycle))]
  CyclicDependency { cycle: Vec<OperationId> },
}

fn format_cycle(cycle: &[OperationId]) -> String {
  let mut rendered: Vec<&str> = cycle.iter().map(OperationId::as_str).collect();
  if let Some(first) = rendered.first().copied() {
    rendered.push(first);
  }
  rendered.join(" -> ")
}
