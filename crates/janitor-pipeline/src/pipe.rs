//! Chaining one stage's consumer into the next stage's producer.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::consumer::ConsumerPool;
use crate::error::{BoxError, PipelineError};
use crate::producer::BoundedProducer;
use crate::source::{Dequeued, Source};

type Stage = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), PipelineError>> + Send>;

/// A stage that converts the items of an upstream source and exposes the
/// results as a bounded source of its own.
///
/// The output capacity throttles the upstream consumer: once it is full,
/// converting workers suspend until the downstream stage catches up. Driving
/// the pipe (which a downstream [`ConsumerPool`] does) drives the upstream
/// source as well, so a chain of pipes runs end to end from its last stage.
pub struct Pipe<O> {
  output: BoundedProducer<O>,
  stage: Arc<Mutex<Option<Stage>>>,
}

impl<O> Clone for Pipe<O> {
  fn clone(&self) -> Self {
    Self {
      output: self.output.clone(),
      stage: self.stage.clone(),
    }
  }
}

impl<O: Send + 'static> Pipe<O> {
  /// Build a stage converting `source` with `concurrency` workers into an
  /// output buffer of `capacity` items.
  ///
  /// `convert` returning `Ok(None)` drops the item.
  pub fn new<S, I, F, Fut>(
    source: S,
    capacity: usize,
    concurrency: usize,
    convert: F,
  ) -> Result<Self, PipelineError>
  where
    S: Source<I>,
    I: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<O>, BoxError>> + Send + 'static,
  {
    let output = BoundedProducer::new(capacity)?;
    let convert = Arc::new(convert);

    let downstream = output.clone();
    let stage: Stage = Box::new(move |cancel: CancellationToken| {
      Box::pin(async move {
        let sink = downstream.clone();
        let sink_cancel = cancel.clone();
        let result = ConsumerPool::new(source)
          .concurrency(concurrency)
          .run(
            move |item| forward(item, convert.clone(), sink.clone(), sink_cancel.clone()),
            &cancel,
          )
          .await;

        // Always, so the next stage sees end-of-stream even after a failure.
        downstream.complete();
        debug!(ok = result.is_ok(), "pipe stage finished");
        result
      })
    });

    Ok(Self {
      output,
      stage: Arc::new(Mutex::new(Some(stage))),
    })
  }

  /// The buffer this stage writes into.
  pub fn output(&self) -> &BoundedProducer<O> {
    &self.output
  }
}

async fn forward<I, O, F, Fut>(
  item: I,
  convert: Arc<F>,
  sink: BoundedProducer<O>,
  cancel: CancellationToken,
) -> Result<(), BoxError>
where
  O: Send + 'static,
  F: Fn(I) -> Fut,
  Fut: Future<Output = Result<Option<O>, BoxError>>,
{
  if let Some(converted) = convert(item).await? {
    sink.enqueue(converted, &cancel).await?;
  }
  Ok(())
}

#[async_trait]
impl<O: Send + 'static> Source<O> for Pipe<O> {
  async fn dequeue(&self, timeout: Option<Duration>) -> Dequeued<O> {
    self.output.dequeue(timeout).await
  }

  async fn drive(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
    let stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner).take();
    match stage {
      Some(stage) => stage(cancel).await,
      None => Ok(()),
    }
  }
}
