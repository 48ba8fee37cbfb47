use std::collections::HashMap;
use std::sync::Arc;

use janitor_operation::{Operation, OperationId};
use tracing::debug;

use crate::capability::Environment;
use crate::descriptor::OperationDescriptor;
use crate::error::CatalogError;
use crate::selection::Selection;

struct Entry<S> {
  descriptor: OperationDescriptor,
  operation: Arc<dyn Operation<S>>,
}

/// Registration table mapping operation identifiers to their descriptors
/// and entry points.
///
/// Built once at process start and read-only afterwards.
pub struct Registry<S> {
  entries: Vec<Entry<S>>,
  index: HashMap<OperationId, usize>,
}

impl<S: Send + Sync + 'static> Registry<S> {
  pub fn builder() -> RegistryBuilder<S> {
    RegistryBuilder {
      registry: Registry {
        entries: Vec::new(),
        index: HashMap::new(),
      },
    }
  }

  pub fn descriptor(&self, id: &str) -> Option<&OperationDescriptor> {
    self.index.get(id).map(|&i| &self.entries[i].descriptor)
  }

  pub fn operation(&self, id: &str) -> Option<Arc<dyn Operation<S>>> {
    self.index.get(id).map(|&i| self.entries[i].operation.clone())
  }

  pub fn contains(&self, id: &str) -> bool {
    self.index.contains_key(id)
  }

  /// Descriptors in registration order.
  pub fn descriptors(&self) -> impl Iterator<Item = &OperationDescriptor> {
    self.entries.iter().map(|e| &e.descriptor)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Materialize the per-run selection state for `environment`.
  pub fn selection(&self, environment: &Environment) -> Selection {
    Selection::new(self.descriptors().cloned(), environment)
  }
}

impl<S> std::fmt::Debug for Registry<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_list()
      .entries(self.entries.iter().map(|e| e.descriptor.id()))
      .finish()
  }
}

pub struct RegistryBuilder<S> {
  registry: Registry<S>,
}

impl<S: Send + Sync + 'static> RegistryBuilder<S> {
  /// Register an operation. Identifiers must be unique.
  pub fn register<O>(mut self, descriptor: OperationDescriptor, operation: O) -> Result<Self, CatalogError>
  where
    O: Operation<S> + 'static,
  {
    let id = descriptor.id().clone();
    if self.registry.index.contains_key(&id) {
      return Err(CatalogError::DuplicateOperation { id });
    }

    debug!(operation_id = %id, "operation_registered");
    self.registry.index.insert(id, self.registry.entries.len());
    self.registry.entries.push(Entry {
      descriptor,
      operation: Arc::new(operation),
    });
    Ok(self)
  }

  pub fn build(self) -> Registry<S> {
    self.registry
  }
}
