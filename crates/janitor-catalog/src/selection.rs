use janitor_operation::OperationId;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::capability::{Capability, Environment};
use crate::descriptor::OperationDescriptor;
use crate::error::CatalogError;

const CHANGE_BUFFER: usize = 64;

/// A descriptor paired with its per-run selection state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionOption {
  descriptor: OperationDescriptor,
  enabled: bool,
  selected: bool,
  conflicted: bool,
}

impl SelectionOption {
  /// An option with no conflict computed yet.
  pub fn new(descriptor: OperationDescriptor, enabled: bool, selected: bool) -> Self {
    Self {
      descriptor,
      enabled,
      selected: selected && enabled,
      conflicted: false,
    }
  }

  /// An enabled, selected option.
  pub fn selected(descriptor: OperationDescriptor) -> Self {
    Self::new(descriptor, true, true)
  }

  pub fn descriptor(&self) -> &OperationDescriptor {
    &self.descriptor
  }

  pub fn id(&self) -> &OperationId {
    self.descriptor.id()
  }

  /// Whether the environment satisfies every required capability.
  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  pub fn is_selected(&self) -> bool {
    self.selected
  }

  /// Whether another selected option conflicts with this one.
  pub fn is_conflicted(&self) -> bool {
    self.conflicted
  }
}

/// Notification sent whenever a selection flag changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectionChanged {
  pub operation_id: OperationId,
  pub selected: bool,
  /// Operations flagged as conflicted after the change.
  pub conflicted: Vec<OperationId>,
}

/// The mutable view of the catalog for one run.
///
/// Conflict flags are recomputed after every change and each change is
/// broadcast to subscribers.
#[derive(Debug)]
pub struct Selection {
  options: Vec<SelectionOption>,
  environment: Environment,
  changes: broadcast::Sender<SelectionChanged>,
}

impl Selection {
  /// Materialize options for `descriptors`. Options start selected when
  /// their default flag is set and the environment enables them.
  pub fn new(descriptors: impl IntoIterator<Item = OperationDescriptor>, environment: &Environment) -> Self {
    let options = descriptors
      .into_iter()
      .map(|descriptor| {
        let enabled = environment.missing(descriptor.requires()).is_empty();
        let selected = descriptor.selected_by_default();
        SelectionOption::new(descriptor, enabled, selected)
      })
      .collect();

    let (changes, _) = broadcast::channel(CHANGE_BUFFER);
    let mut selection = Self {
      options,
      environment: environment.clone(),
      changes,
    };
    selection.recompute_conflicts();
    selection
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SelectionChanged> {
    self.changes.subscribe()
  }

  pub fn options(&self) -> &[SelectionOption] {
    &self.options
  }

  pub fn get(&self, id: &str) -> Option<&SelectionOption> {
    self.options.iter().find(|o| o.id() == id)
  }

  /// Selected options, in catalog order.
  pub fn selected(&self) -> impl Iterator<Item = &SelectionOption> {
    self.options.iter().filter(|o| o.selected)
  }

  pub fn has_conflicts(&self) -> bool {
    self.selected().any(|o| o.conflicted)
  }

  /// Select or deselect one option.
  pub fn set_selected(&mut self, id: &str, selected: bool) -> Result<(), CatalogError> {
    let index = self.validate(id, selected)?;
    self.apply(index, selected);
    Ok(())
  }

  /// Select exactly `ids`, deselecting everything else.
  ///
  /// Nothing changes unless every id is known and enabled.
  pub fn select_only<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> Result<(), CatalogError> {
    let mut wanted = vec![false; self.options.len()];
    for id in ids {
      wanted[self.validate(id, true)?] = true;
    }

    for (index, selected) in wanted.into_iter().enumerate() {
      self.apply(index, selected);
    }
    Ok(())
  }

  fn validate(&self, id: &str, selecting: bool) -> Result<usize, CatalogError> {
    let index = self
      .options
      .iter()
      .position(|o| o.id() == id)
      .ok_or_else(|| CatalogError::UnknownOperation { id: id.into() })?;

    let option = &self.options[index];
    if selecting && !option.enabled {
      let missing: Vec<Capability> = self
        .environment
        .missing(option.descriptor.requires())
        .into_iter()
        .cloned()
        .collect();
      return Err(CatalogError::Disabled {
        id: option.id().clone(),
        missing,
      });
    }
    Ok(index)
  }

  fn apply(&mut self, index: usize, selected: bool) {
    if self.options[index].selected == selected {
      return;
    }
    self.options[index].selected = selected;
    self.recompute_conflicts();

    let change = SelectionChanged {
      operation_id: self.options[index].id().clone(),
      selected,
      conflicted: self
        .options
        .iter()
        .filter(|o| o.conflicted)
        .map(|o| o.id().clone())
        .collect(),
    };
    debug!(operation_id = %change.operation_id, selected, "selection_changed");
    // No subscribers is fine.
    let _ = self.changes.send(change);
  }

  fn recompute_conflicts(&mut self) {
    let flags: Vec<bool> = self
      .options
      .iter()
      .enumerate()
      .map(|(i, option)| {
        self
          .options
          .iter()
          .enumerate()
          .any(|(j, other)| i != j && other.selected && option.descriptor.conflicts(&other.descriptor))
      })
      .collect();

    for (option, conflicted) in self.options.iter_mut().zip(flags) {
      option.conflicted = conflicted;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn catalog() -> Vec<OperationDescriptor> {
    vec![
      OperationDescriptor::builder("x").selected_by_default(true).build(),
      OperationDescriptor::builder("y").after("x").selected_by_default(true).build(),
      OperationDescriptor::builder("z").conflicts_with("y").build(),
      OperationDescriptor::builder("geo")
        .requires(Capability::NETWORK_GEOCODING)
        .selected_by_default(true)
        .build(),
    ]
  }

  #[test]
  fn test_initial_state_follows_defaults_and_environment() {
    let selection = Selection::new(catalog(), &Environment::new());

    let selected: Vec<_> = selection.selected().map(|o| o.id().as_str()).collect();
    assert_eq!(selected, vec!["x", "y"]);

    let geo = selection.get("geo").unwrap();
    assert!(!geo.is_enabled());
    assert!(!geo.is_selected());
  }

  #[test]
  fn test_environment_enables_capability_bound_options() {
    let env = Environment::new().with(Capability::NETWORK_GEOCODING);
    let selection = Selection::new(catalog(), &env);
    assert!(selection.get("geo").unwrap().is_selected());
  }

  #[test]
  fn test_conflict_flags_are_symmetric() {
    let mut selection = Selection::new(catalog(), &Environment::new());
    assert!(!selection.has_conflicts());

    selection.set_selected("z", true).unwrap();
    assert!(selection.get("y").unwrap().is_conflicted());
    assert!(selection.get("z").unwrap().is_conflicted());
    assert!(!selection.get("x").unwrap().is_conflicted());
    assert!(selection.has_conflicts());

    selection.set_selected("z", false).unwrap();
    assert!(!selection.get("y").unwrap().is_conflicted());
    assert!(!selection.has_conflicts());
  }

  #[test]
  fn test_rejects_unknown_and_disabled() {
    let mut selection = Selection::new(catalog(), &Environment::new());

    assert!(matches!(
      selection.set_selected("nope", true),
      Err(CatalogError::UnknownOperation { .. })
    ));
    match selection.set_selected("geo", true) {
      Err(CatalogError::Disabled { id, missing }) => {
        assert_eq!(id, "geo");
        assert_eq!(missing, vec![Capability::NETWORK_GEOCODING]);
      }
      other => panic!("expected disabled error, got {other:?}"),
    }

    // Deselecting a disabled option is harmless.
    selection.set_selected("geo", false).unwrap();
  }

  #[test]
  fn test_select_only_is_all_or_nothing() {
    let mut selection = Selection::new(catalog(), &Environment::new());

    assert!(selection.select_only(["z", "missing"]).is_err());
    let selected: Vec<_> = selection.selected().map(|o| o.id().as_str()).collect();
    assert_eq!(selected, vec!["x", "y"]);

    selection.select_only(["z"]).unwrap();
    let selected: Vec<_> = selection.selected().map(|o| o.id().as_str()).collect();
    assert_eq!(selected, vec!["z"]);
  }

  #[tokio::test]
  async fn test_changes_are_broadcast() {
    let mut selection = Selection::new(catalog(), &Environment::new());
    let mut changes = selection.subscribe();

    selection.set_selected("z", true).unwrap();
    // Re-selecting is not a change.
    selection.set_selected("z", true).unwrap();
    selection.set_selected("y", false).unwrap();

    let first = changes.recv().await.unwrap();
    assert_eq!(first.operation_id, "z");
    assert!(first.selected);
    assert_eq!(first.conflicted, vec![OperationId::new("y"), OperationId::new("z")]);

    let second = changes.recv().await.unwrap();
    assert_eq!(second.operation_id, "y");
    assert!(!second.selected);
    // z stays selected, so y is still flagged even though it is deselected.
    assert_eq!(second.conflicted, vec![OperationId::new("y")]);
    assert!(changes.try_recv().is_err());
  }
}
