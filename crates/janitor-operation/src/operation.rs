use std::future::Future;

use async_trait::async_trait;
use janitor_pipeline::BoxError;

use crate::context::OperationContext;

/// Asynchronous entry point of a maintenance operation.
///
/// Implementations must check [`OperationContext::cancel`] at every loop
/// iteration and suspension point and return promptly once it fires. Any
/// error aborts the run.
#[async_trait]
pub trait Operation<S: Send + Sync + 'static>: Send + Sync {
  async fn execute(&self, ctx: OperationContext<S>) -> Result<(), BoxError>;
}

/// An [`Operation`] backed by a closure.
pub struct FnOperation<F> {
  f: F,
}

/// Wrap a closure as an [`Operation`].
pub fn from_fn<S, F, Fut>(f: F) -> FnOperation<F>
where
  S: Send + Sync + 'static,
  F: Fn(OperationContext<S>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), BoxError>> + Send,
{
  FnOperation { f }
}

#[async_trait]
impl<S, F, Fut> Operation<S> for FnOperation<F>
where
  S: Send + Sync + 'static,
  F: Fn(OperationContext<S>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), BoxError>> + Send,
{
  async fn execute(&self, ctx: OperationContext<S>) -> Result<(), BoxError> {
    (self.f)(ctx).await
  }
}
