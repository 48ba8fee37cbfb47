use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use janitor_pipeline::BoxError;
use tracing::{debug, warn};

use crate::error::OperationError;

type Release = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

struct Resource {
  name: String,
  release: Release,
}

/// Transient per-run resources (store handles, scratch files, ...).
///
/// Operations register a release callback for anything they acquire. The
/// engine releases everything, most recent first, when the run ends, however
/// it ends. Clones share the same registry.
#[derive(Clone, Default)]
pub struct RunResources {
  held: Arc<Mutex<Vec<Resource>>>,
}

impl RunResources {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Vec<Resource>> {
    self.held.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register `release` to run when the run ends.
  pub fn register<F>(&self, name: impl Into<String>, release: F)
  where
    F: FnOnce() -> Result<(), BoxError> + Send + 'static,
  {
    let name = name.into();
    debug!(resource = %name, "run_resource_acquired");
    self.lock().push(Resource {
      name,
      release: Box::new(release),
    });
  }

  /// Number of resources still held.
  pub fn len(&self) -> usize {
    self.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.lock().is_empty()
  }

  /// Release every held resource in reverse registration order.
  ///
  /// A failing release does not stop the others; failures are logged and
  /// returned.
  pub fn release_all(&self) -> Vec<OperationError> {
    let held = std::mem::take(&mut *self.lock());

    let mut failures = Vec::new();
    for resource in held.into_iter().rev() {
      match (resource.release)() {
        Ok(()) => debug!(resource = %resource.name, "run_resource_released"),
        Err(source) => {
          warn!(resource = %resource.name, error = %source, "run_resource_release_failed");
          failures.push(OperationError::Release {
            name: resource.name,
            source,
          });
        }
      }
    }
    failures
  }
}

impl fmt::Debug for RunResources {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let names: Vec<String> = self.lock().iter().map(|r| r.name.clone()).collect();
    f.debug_struct("RunResources").field("held", &names).finish()
  }
}
