use janitor_operation::OperationId;
use thiserror::Error;

use crate::capability::Capability;

#[derive(Debug, Error)]
pub enum CatalogError {
  #[error("operation '{id}' is registered more than once")]
  DuplicateOperation { id: OperationId },

  #[error("unknown operation: {id}")]
  UnknownOperation { id: OperationId },

  #[error("operation '{id}' is disabled: missing {}", join(.missing))]
  Disabled {
    id: OperationId,
    missing: Vec<Capability>,
  },
}

fn join(capabilities: &[Capability]) -> String {
  capabilities
    .iter()
    .map(Capability::name)
    .collect::<Vec<_>>()
    .join(", ")
}
