use janitor_catalog::OperationId;
use serde::{Deserialize, Serialize};

/// The resolved, ordered sequence of operations for one run.
///
/// Every operation appears once, after every member of its after-set that is
/// also in the plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionPlan {
  operations: Vec<OperationId>,
}

impl ExecutionPlan {
  pub(crate) fn new(operations: Vec<OperationId>) -> Self {
    Self { operations }
  }

  pub fn iter(&self) -> std::slice::Iter<'_, OperationId> {
    self.operations.iter()
  }

  pub fn len(&self) -> usize {
    self.operations.len()
  }

  pub fn is_empty(&self) -> bool {
    self.operations.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.position(id).is_some()
  }

  /// Zero-based position of `id` in the plan.
  pub fn position(&self, id: &str) -> Option<usize> {
    self.operations.iter().position(|o| o == id)
  }

  pub fn as_slice(&self) -> &[OperationId] {
    &self.operations
  }
}

impl<'a> IntoIterator for &'a ExecutionPlan {
  type Item = &'a OperationId;
  type IntoIter = std::slice::Iter<'a, OperationId>;

  fn into_iter(self) -> Self::IntoIter {
    self.iter()
  }
}

impl std::fmt::Display for ExecutionPlan {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    for (i, id) in self.operations.iter().enumerate() {
      if i > 0 {
        f.write_str(" -> ")?;
      }
      write!(f, "{id}")?;
    }
    Ok(())
  }
}
