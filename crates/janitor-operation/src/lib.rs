//! The seam between the janitor engine and individual maintenance operations.
//!
//! An operation implements [`Operation`]; the engine hands each invocation an
//! [`OperationContext`] carrying the run-wide cancellation token, a progress
//! reporter, the per-run resource registry and the caller's services.

mod context;
mod error;
mod id;
mod operation;
mod progress;
mod resources;

pub use context::OperationContext;
pub use error::OperationError;
pub use id::OperationId;
pub use janitor_pipeline::BoxError;
pub use operation::{FnOperation, Operation, from_fn};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use resources::RunResources;
