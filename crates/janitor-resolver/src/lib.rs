mod error;
mod plan;
mod resolver;

pub use error::ResolveError;
pub use plan::ExecutionPlan;
pub use resolver::{order, resolve};
