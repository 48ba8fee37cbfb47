//! Janitor Catalog
//!
//! The explicit registration table of maintenance operations and the
//! per-run selection state derived from it.
//!
//! Operations are registered once at process start with a descriptor
//! (identity, metadata, capability requirements, ordering and exclusion
//! constraints) and an entry point. For each run the registry materializes a
//! [`Selection`], whose options track which operations are enabled in the
//! current [`Environment`], which the user selected, and which are in
//! conflict.

mod capability;
mod descriptor;
mod error;
mod registry;
mod selection;

pub use capability::{Capability, Environment};
pub use descriptor::{DescriptorBuilder, OperationDescriptor};
pub use error::CatalogError;
pub use janitor_operation::OperationId;
pub use registry::{Registry, RegistryBuilder};
pub use selection::{Selection, SelectionChanged, SelectionOption};
