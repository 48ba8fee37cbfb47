//! Background runs with an event stream.
//!
//! The `EngineRunner` spawns each run on the tokio runtime and hands back a
//! `RunHandle` for observing events, cancelling and awaiting the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use janitor_catalog::Registry;
use janitor_resolver::ExecutionPlan;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::engine::{Engine, EngineConfig};
use crate::error::EngineError;
use crate::events::{ChannelNotifier, ExecutionEvent};
use crate::outcome::RunOutcome;

/// Spawns plan runs in the background, one at a time.
///
/// # Usage
///
/// ```ignore
/// let runner = EngineRunner::new(registry, services);
/// let mut handle = runner.spawn(plan, CancellationToken::new())?;
///
/// while let Some(event) = handle.next_event().await {
///     render(event);
/// }
/// let outcome = handle.wait().await?;
/// ```
pub struct EngineRunner<S> {
  registry: Arc<Registry<S>>,
  services: S,
  config: EngineConfig,
  running: Arc<AtomicBool>,
}

impl<S: Clone + Send + Sync + 'static> EngineRunner<S> {
  pub fn new(registry: Arc<Registry<S>>, services: S) -> Self {
    Self {
      registry,
      services,
      config: EngineConfig::default(),
      running: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  pub fn registry(&self) -> &Registry<S> {
    &self.registry
  }

  /// Whether a spawned run has not yet finished.
  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::Acquire)
  }

  /// Start `plan` on a background task.
  ///
  /// Fails with `AlreadyRunning` while a previous run is still active.
  /// Cancelling `cancel`, or calling [`RunHandle::cancel`], stops the run
  /// at the next operation boundary or cancellation checkpoint.
  pub fn spawn(&self, plan: ExecutionPlan, cancel: CancellationToken) -> Result<RunHandle, EngineError> {
    let lease = RunLease::acquire(&self.running).ok_or(EngineError::AlreadyRunning)?;

    let (sender, events) = mpsc::unbounded_channel();
    let engine = Engine::with_notifier(
      self.registry.clone(),
      self.services.clone(),
      ChannelNotifier::new(sender),
    )
    .with_config(self.config.clone());

    let run_cancel = cancel.clone();
    let task = tokio::spawn(async move {
      let _lease = lease;
      let result = engine.run(&plan, run_cancel).await;
      if let Err(e) = &result {
        error!(error = %e, "run_rejected");
      }
      result
    });

    info!("run_spawned");
    Ok(RunHandle {
      events,
      cancel,
      task,
    })
  }
}

/// Handle to a spawned run.
pub struct RunHandle {
  events: mpsc::UnboundedReceiver<ExecutionEvent>,
  cancel: CancellationToken,
  task: JoinHandle<Result<RunOutcome, EngineError>>,
}

impl RunHandle {
  /// Request cancellation of the run.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Next event of the run, or `None` once the run has ended and every
  /// event was received.
  pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
    self.events.recv().await
  }

  /// Wait for the run to end. Events not yet received are discarded.
  pub async fn wait(self) -> Result<RunOutcome, EngineError> {
    match self.task.await {
      Ok(result) => result,
      Err(e) => Err(EngineError::RunAborted {
        message: e.to_string(),
      }),
    }
  }
}

struct RunLease(Arc<AtomicBool>);

impl RunLease {
  fn acquire(running: &Arc<AtomicBool>) -> Option<Self> {
    running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()?;
    Some(Self(running.clone()))
  }
}

impl Drop for RunLease {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use janitor_catalog::OperationDescriptor;
  use janitor_operation::{BoxError, OperationContext, from_fn};
  use janitor_resolver::order;

  fn registry() -> Arc<Registry<()>> {
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("wait-for-cancel").build(),
        from_fn(|ctx: OperationContext<()>| async move {
          ctx.cancel().cancelled().await;
          ctx.checkpoint()?;
          Ok::<(), BoxError>(())
        }),
      )
      .unwrap()
      .build();
    Arc::new(registry)
  }

  #[tokio::test]
  async fn test_single_active_run() {
    let runner = EngineRunner::new(registry(), ());
    let plan = order(runner.registry().descriptors()).unwrap();

    let handle = runner.spawn(plan.clone(), CancellationToken::new()).unwrap();
    assert!(runner.is_running());
    assert!(matches!(
      runner.spawn(plan.clone(), CancellationToken::new()),
      Err(EngineError::AlreadyRunning)
    ));

    handle.cancel();
    assert!(handle.wait().await.unwrap().is_cancelled());
    assert!(!runner.is_running());

    // A new run may start once the previous one ended.
    let handle = runner.spawn(plan, CancellationToken::new()).unwrap();
    handle.cancel();
    assert!(handle.wait().await.unwrap().is_cancelled());
  }

  #[tokio::test]
  async fn test_events_end_with_terminal_event() {
    let runner = EngineRunner::new(registry(), ());
    let plan = order(runner.registry().descriptors()).unwrap();
    let mut handle = runner.spawn(plan, CancellationToken::new()).unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
      if matches!(event, ExecutionEvent::OperationStarted { .. }) {
        handle.cancel();
      }
      events.push(event);
    }

    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
    assert!(events.last().is_some_and(ExecutionEvent::is_terminal));
    assert!(handle.wait().await.unwrap().is_cancelled());
  }
}
