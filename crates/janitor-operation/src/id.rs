use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier of a maintenance operation.
///
/// Identifiers are opaque and stay the same across runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for OperationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for OperationId {
  fn from(id: &str) -> Self {
    Self::new(id)
  }
}

impl From<String> for OperationId {
  fn from(id: String) -> Self {
    Self(id)
  }
}

impl Borrow<str> for OperationId {
  fn borrow(&self) -> &str {
    &self.0
  }
}

impl AsRef<str> for OperationId {
  fn as_ref(&self) -> &str {
    &self.0
  }
}

impl PartialEq<str> for OperationId {
  fn eq(&self, other: &str) -> bool {
    self.0 == other
  }
}

impl PartialEq<&str> for OperationId {
  fn eq(&self, other: &&str) -> bool {
    self.0 == *other
  }
}
