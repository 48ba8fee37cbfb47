use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A named precondition an operation needs from its environment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(Cow<'static, str>);

impl Capability {
  /// A root directory for files that live outside the data store.
  pub const EXTERNAL_FILE_ROOT: Capability = Capability(Cow::Borrowed("external-file-root"));

  /// Access to a network geocoding service, including credentials.
  pub const NETWORK_GEOCODING: Capability = Capability(Cow::Borrowed("network-geocoding"));

  pub fn new(name: impl Into<String>) -> Self {
    Self(Cow::Owned(name.into()))
  }

  pub fn name(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Capability {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The capabilities the current process can satisfy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
  capabilities: BTreeSet<Capability>,
}

impl Environment {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, capability: Capability) -> Self {
    self.grant(capability);
    self
  }

  pub fn grant(&mut self, capability: Capability) {
    self.capabilities.insert(capability);
  }

  pub fn has(&self, capability: &Capability) -> bool {
    self.capabilities.contains(capability)
  }

  /// The members of `required` this environment lacks, in order.
  pub fn missing<'a>(&self, required: &'a [Capability]) -> Vec<&'a Capability> {
    required.iter().filter(|c| !self.has(c)).collect()
  }

  pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
    self.capabilities.iter()
  }
}
