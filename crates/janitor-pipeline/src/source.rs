//! The seam between pipeline stages.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;

/// Outcome of a single dequeue attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dequeued<T> {
  /// The next item in FIFO order.
  Item(T),
  /// Nothing arrived before the timeout. More items may still follow.
  Timeout,
  /// The source is complete and fully drained.
  EndOfStream,
}

impl<T> Dequeued<T> {
  /// Take the item, if any.
  pub fn into_item(self) -> Option<T> {
    match self {
      Dequeued::Item(item) => Some(item),
      _ => None,
    }
  }

  pub fn is_end_of_stream(&self) -> bool {
    matches!(self, Dequeued::EndOfStream)
  }
}

/// Something a [`ConsumerPool`](crate::ConsumerPool) can drain.
///
/// Sources are cheap handles; clones observe the same underlying stream.
#[async_trait]
pub trait Source<T: Send + 'static>: Clone + Send + Sync + 'static {
  /// Take the next item, suspending up to `timeout` (`None` = no deadline).
  async fn dequeue(&self, timeout: Option<Duration>) -> Dequeued<T>;

  /// Run whatever feeds this source.
  ///
  /// Called once by the consumer, concurrently with its workers. Sources that
  /// are filled externally have nothing to drive.
  async fn drive(&self, _cancel: CancellationToken) -> Result<(), PipelineError> {
    Ok(())
  }
}
