//! Capacity-bounded async queue with backpressure.
//!
//! Writers suspend in [`BoundedProducer::enqueue`] while the queue holds
//! `capacity` unread items; readers suspend in [`BoundedProducer::dequeue`]
//! while it is empty. Two [`Signal`]s coordinate them. Because signals
//! saturate, every party that observes remaining work passes the signal on
//! (the "baton") so that no waiter is left asleep while items or room exist.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, PipelineError};
use crate::signal::Signal;
use crate::source::{Dequeued, Source};

type GenerateFn<T> =
  Arc<dyn Fn(ProducerHandle<T>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

struct Generator<T> {
  workers: usize,
  routine: GenerateFn<T>,
}

struct QueueState<T> {
  items: VecDeque<T>,
  completed: bool,
}

struct ProducerInner<T> {
  capacity: usize,
  state: Mutex<QueueState<T>>,
  readable: Signal,
  writable: Signal,
  generator: Mutex<Option<Generator<T>>>,
}

/// A bounded FIFO queue shared between async writers and readers.
///
/// Cloning yields another handle to the same queue.
pub struct BoundedProducer<T> {
  inner: Arc<ProducerInner<T>>,
}

impl<T> Clone for BoundedProducer<T> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
    }
  }
}

impl<T: Send + 'static> std::fmt::Debug for BoundedProducer<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.lock();
    f.debug_struct("BoundedProducer")
      .field("capacity", &self.inner.capacity)
      .field("len", &state.items.len())
      .field("completed", &state.completed)
      .finish()
  }
}

impl<T: Send + 'static> BoundedProducer<T> {
  /// Create an empty producer holding at most `capacity` unread items.
  pub fn new(capacity: usize) -> Result<Self, PipelineError> {
    if capacity == 0 {
      return Err(PipelineError::InvalidCapacity);
    }

    Ok(Self {
      inner: Arc::new(ProducerInner {
        capacity,
        state: Mutex::new(QueueState {
          items: VecDeque::with_capacity(capacity),
          completed: false,
        }),
        readable: Signal::new(),
        writable: Signal::new(),
        generator: Mutex::new(None),
      }),
    })
  }

  /// Create a producer fed by `routine` running on `workers` concurrent tasks.
  ///
  /// Nothing runs until the producer is driven (see [`Source::drive`]); a
  /// [`ConsumerPool`](crate::ConsumerPool) does this automatically. The
  /// producer completes once every worker has returned.
  pub fn generate<F, Fut>(capacity: usize, workers: usize, routine: F) -> Result<Self, PipelineError>
  where
    F: Fn(ProducerHandle<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
  {
    let producer = Self::new(capacity)?;
    let routine: GenerateFn<T> = Arc::new(move |handle| Box::pin(routine(handle)));
    *producer.inner.generator.lock().unwrap_or_else(PoisonError::into_inner) = Some(Generator {
      workers: workers.max(1),
      routine,
    });
    Ok(producer)
  }

  fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
    self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Admit `item`, suspending while the queue is full.
  pub async fn enqueue(&self, item: T, cancel: &CancellationToken) -> Result<(), PipelineError> {
    loop {
      if cancel.is_cancelled() {
        return Err(PipelineError::Cancelled);
      }

      {
        let mut state = self.lock();
        if state.completed {
          drop(state);
          self.inner.writable.set();
          return Err(PipelineError::Closed);
        }

        if state.items.len() < self.inner.capacity {
          state.items.push_back(item);
          let has_room = state.items.len() < self.inner.capacity;
          drop(state);

          self.inner.readable.set();
          if has_room {
            self.inner.writable.set();
          }
          return Ok(());
        }
      }

      tokio::select! {
        _ = self.inner.writable.wait(None) => {}
        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
      }
    }
  }

  /// Take the next item, suspending up to `timeout` while the queue is empty.
  ///
  /// A timeout is reported as [`Dequeued::Timeout`], never as end-of-stream.
  pub async fn dequeue(&self, timeout: Option<Duration>) -> Dequeued<T> {
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
      {
        let mut state = self.lock();
        if let Some(item) = state.items.pop_front() {
          let more_to_read = !state.items.is_empty() || state.completed;
          drop(state);

          self.inner.writable.set();
          if more_to_read {
            self.inner.readable.set();
          }
          return Dequeued::Item(item);
        }

        if state.completed {
          drop(state);
          self.inner.readable.set();
          return Dequeued::EndOfStream;
        }
      }

      let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
      if !self.inner.readable.wait(remaining).await {
        return Dequeued::Timeout;
      }
    }
  }

  /// Mark that no further items will be enqueued. Idempotent.
  pub fn complete(&self) {
    {
      let mut state = self.lock();
      if state.completed {
        return;
      }
      state.completed = true;
    }

    self.inner.readable.set();
    self.inner.writable.set();
  }

  pub fn capacity(&self) -> usize {
    self.inner.capacity
  }

  /// Number of unread items.
  pub fn len(&self) -> usize {
    self.lock().items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn is_completed(&self) -> bool {
    self.lock().completed
  }

  async fn run_generator(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
    let generator = self
      .inner
      .generator
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();

    let Some(generator) = generator else {
      debug!("producer has no generator to drive");
      return Ok(());
    };

    let stop = cancel.child_token();
    let mut workers = JoinSet::new();
    for worker in 0..generator.workers {
      let handle = ProducerHandle {
        producer: self.clone(),
        worker,
        cancel: stop.clone(),
      };
      let routine = generator.routine.clone();
      workers.spawn(async move {
        routine(handle)
          .await
          .map_err(|e| PipelineError::generator(worker, e))
      });
    }

    let mut failure: Option<PipelineError> = None;
    while let Some(joined) = workers.join_next().await {
      let result = joined.map_err(PipelineError::from).and_then(|r| r);
      if let Err(err) = result {
        if failure.is_none() {
          if !err.is_cancelled() {
            warn!(error = %err, "generator worker failed");
          }
          stop.cancel();
          failure = Some(err);
        }
      }
    }

    self.complete();

    match failure {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }
}

#[async_trait]
impl<T: Send + 'static> Source<T> for BoundedProducer<T> {
  async fn dequeue(&self, timeout: Option<Duration>) -> Dequeued<T> {
    BoundedProducer::dequeue(self, timeout).await
  }

  async fn drive(&self, cancel: CancellationToken) -> Result<(), PipelineError> {
    self.run_generator(cancel).await
  }
}

/// Handle given to each generator worker.
pub struct ProducerHandle<T> {
  producer: BoundedProducer<T>,
  worker: usize,
  cancel: CancellationToken,
}

impl<T: Send + 'static> ProducerHandle<T> {
  /// Enqueue into the producer being generated, honoring backpressure.
  pub async fn enqueue(&self, item: T) -> Result<(), PipelineError> {
    self.producer.enqueue(item, &self.cancel).await
  }

  /// Index of this worker, in `0..workers`.
  pub fn worker(&self) -> usize {
    self.worker
  }

  /// Cancellation token shared by all generator workers.
  pub fn cancel(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}
