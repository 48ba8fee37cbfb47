use janitor_operation::OperationId;
use serde::{Deserialize, Serialize};

use crate::capability::Capability;

/// Immutable identity and metadata of a maintenance operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
  id: OperationId,
  title: String,
  category: String,
  description: String,
  selected_by_default: bool,
  requires: Vec<Capability>,
  after: Vec<OperationId>,
  conflicts_with: Vec<OperationId>,
}

impl OperationDescriptor {
  pub fn builder(id: impl Into<OperationId>) -> DescriptorBuilder {
    let id = id.into();
    DescriptorBuilder {
      descriptor: OperationDescriptor {
        title: id.to_string(),
        id,
        category: String::new(),
        description: String::new(),
        selected_by_default: false,
        requires: Vec::new(),
        after: Vec::new(),
        conflicts_with: Vec::new(),
      },
    }
  }

  pub fn id(&self) -> &OperationId {
    &self.id
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn category(&self) -> &str {
    &self.category
  }

  pub fn description(&self) -> &str {
    &self.description
  }

  pub fn selected_by_default(&self) -> bool {
    self.selected_by_default
  }

  /// Capabilities the environment must provide for this operation to be
  /// enabled.
  pub fn requires(&self) -> &[Capability] {
    &self.requires
  }

  /// Operations that must run before this one when both are in a run.
  pub fn after(&self) -> &[OperationId] {
    &self.after
  }

  /// Operations that must not be selected together with this one.
  pub fn conflicts_with(&self) -> &[OperationId] {
    &self.conflicts_with
  }

  /// Whether either descriptor declares a conflict with the other.
  pub fn conflicts(&self, other: &OperationDescriptor) -> bool {
    self.conflicts_with.contains(&other.id) || other.conflicts_with.contains(&self.id)
  }
}

/// Builder for [`OperationDescriptor`].
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
  descriptor: OperationDescriptor,
}

impl DescriptorBuilder {
  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.descriptor.title = title.into();
    self
  }

  pub fn category(mut self, category: impl Into<String>) -> Self {
    self.descriptor.category = category.into();
    self
  }

  pub fn description(mut self, description: impl Into<String>) -> Self {
    self.descriptor.description = description.into();
    self
  }

  pub fn selected_by_default(mut self, selected: bool) -> Self {
    self.descriptor.selected_by_default = selected;
    self
  }

  pub fn requires(mut self, capability: Capability) -> Self {
    push_unique(&mut self.descriptor.requires, capability);
    self
  }

  pub fn after(mut self, id: impl Into<OperationId>) -> Self {
    push_unique(&mut self.descriptor.after, id.into());
    self
  }

  pub fn conflicts_with(mut self, id: impl Into<OperationId>) -> Self {
    push_unique(&mut self.descriptor.conflicts_with, id.into());
    self
  }

  pub fn build(self) -> OperationDescriptor {
    self.descriptor
  }
}

fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
  if !items.contains(&item) {
    items.push(item);
  }
}
