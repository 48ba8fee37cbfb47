//! Fixed-size worker pool draining a [`Source`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, PipelineError};
use crate::source::{Dequeued, Source};

/// Number of workers when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// How long a worker waits on an empty source before re-checking cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs a per-item handler against every item of a source, on up to
/// `concurrency` workers at once.
pub struct ConsumerPool<S, T> {
  source: S,
  concurrency: usize,
  poll_interval: Duration,
  _item: PhantomData<fn() -> T>,
}

impl<S, T> ConsumerPool<S, T>
where
  S: Source<T>,
  T: Send + 'static,
{
  pub fn new(source: S) -> Self {
    Self {
      source,
      concurrency: DEFAULT_CONCURRENCY,
      poll_interval: POLL_INTERVAL,
      _item: PhantomData,
    }
  }

  /// Set the number of workers. Values below 1 are raised to 1.
  pub fn concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency.max(1);
    self
  }

  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  /// Drain the source.
  ///
  /// Returns once every worker has observed end-of-stream and the source's
  /// drive step has finished. The first handler error stops the remaining
  /// workers and the drive step and is returned.
  pub async fn run<H, Fut>(self, handler: H, cancel: &CancellationToken) -> Result<(), PipelineError>
  where
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
  {
    let stop = cancel.child_token();
    // A dropped run must not leave the drive step blocked on a full queue.
    let _stop_on_drop = stop.clone().drop_guard();
    let handler = Arc::new(handler);

    let mut driver = JoinSet::new();
    {
      let source = self.source.clone();
      let stop = stop.clone();
      driver.spawn(async move { source.drive(stop).await });
    }

    let mut workers = JoinSet::new();
    for worker in 0..self.concurrency {
      workers.spawn(consume(
        worker,
        self.source.clone(),
        handler.clone(),
        stop.clone(),
        self.poll_interval,
      ));
    }

    let mut failure = FirstFailure::default();
    loop {
      tokio::select! {
        joined = workers.join_next() => match joined {
          Some(joined) => {
            let result = joined.map_err(PipelineError::from).and_then(|r| r);
            failure.record(result, &stop);
          }
          None => break,
        },
        Some(joined) = driver.join_next() => {
          let result = joined.map_err(PipelineError::from).and_then(|r| r);
          failure.record(result, &stop);
        }
      }
    }

    while let Some(joined) = driver.join_next().await {
      let result = joined.map_err(PipelineError::from).and_then(|r| r);
      failure.record(result, &stop);
    }

    match failure.into_inner() {
      Some(err) => Err(err),
      None if cancel.is_cancelled() => Err(PipelineError::Cancelled),
      None => Ok(()),
    }
  }
}

#[derive(Default)]
struct FirstFailure(Option<PipelineError>);

impl FirstFailure {
  /// Keep the first real failure; a cancellation only counts when nothing
  /// else went wrong.
  fn record(&mut self, result: Result<(), PipelineError>, stop: &CancellationToken) {
    let Err(err) = result else {
      return;
    };

    match &self.0 {
      None => {
        if !err.is_cancelled() {
          warn!(error = %err, "consumer pool stopping after failure");
        }
        stop.cancel();
        self.0 = Some(err);
      }
      Some(existing) if existing.is_cancelled() && !err.is_cancelled() => {
        self.0 = Some(err);
      }
      Some(_) => {}
    }
  }

  fn into_inner(self) -> Option<PipelineError> {
    self.0
  }
}

async fn consume<S, T, H, Fut>(
  worker: usize,
  source: S,
  handler: Arc<H>,
  stop: CancellationToken,
  poll_interval: Duration,
) -> Result<(), PipelineError>
where
  S: Source<T>,
  T: Send + 'static,
  H: Fn(T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
  loop {
    if stop.is_cancelled() {
      return Err(PipelineError::Cancelled);
    }

    match source.dequeue(Some(poll_interval)).await {
      Dequeued::Item(item) => handler(item).await.map_err(PipelineError::handler)?,
      Dequeued::Timeout => continue,
      Dequeued::EndOfStream => {
        debug!(worker, "consumer worker reached end of stream");
        return Ok(());
      }
    }
  }
}
