//! Sequential plan execution.
//!
//! The `Engine` walks an execution plan strictly in order, one operation at
//! a time, relaying lifecycle and progress events to its notifier. The first
//! failure aborts the rest of the plan; cancellation is checked before each
//! operation and ends the run as `Cancelled`.

use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use janitor_catalog::{OperationId, Registry};
use janitor_operation::{
  BoxError, Operation, OperationContext, ProgressReporter, ProgressUpdate, RunResources,
};
use janitor_resolver::ExecutionPlan;
use tokio_util::sync::CancellationToken;
use tracing::{Span, error, info, instrument, warn};

use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::outcome::{OperationFailure, RunOutcome, RunState, RunSummary};
use crate::throttle::ProgressThrottle;

/// Progress events per second and operation when not configured.
pub const DEFAULT_MAX_PROGRESS_UPDATES_PER_SECOND: u32 = 60;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Upper bound on progress events per second for one operation. Excess
  /// updates are dropped. Zero disables throttling.
  pub max_progress_updates_per_second: u32,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      max_progress_updates_per_second: DEFAULT_MAX_PROGRESS_UPDATES_PER_SECOND,
    }
  }
}

type Scheduled<S> = (OperationId, Arc<dyn Operation<S>>);

/// Latest update the throttle held back for one operation.
type Withheld = Arc<Mutex<Option<ProgressUpdate>>>;

/// The plan execution engine.
///
/// Generic over `N: ExecutionNotifier` to allow different notification
/// strategies. Use `Engine::new()` for an engine that discards events, or
/// `Engine::with_notifier()` to observe them. One engine runs at most one
/// plan at a time.
pub struct Engine<S, N: ExecutionNotifier = NoopNotifier> {
  registry: Arc<Registry<S>>,
  services: S,
  notifier: Arc<N>,
  config: EngineConfig,
  running: AtomicBool,
  state: Mutex<RunState>,
}

impl<S: Clone + Send + Sync + 'static> Engine<S, NoopNotifier> {
  /// Create an engine with no-op notifications.
  pub fn new(registry: Arc<Registry<S>>, services: S) -> Self {
    Self::with_notifier(registry, services, NoopNotifier)
  }
}

impl<S, N> Engine<S, N>
where
  S: Clone + Send + Sync + 'static,
  N: ExecutionNotifier + 'static,
{
  /// Create an engine with a custom notifier.
  pub fn with_notifier(registry: Arc<Registry<S>>, services: S, notifier: N) -> Self {
    Self {
      registry,
      services,
      notifier: Arc::new(notifier),
      config: EngineConfig::default(),
      running: AtomicBool::new(false),
      state: Mutex::new(RunState::Idle),
    }
  }

  pub fn with_config(mut self, config: EngineConfig) -> Self {
    self.config = config;
    self
  }

  /// State of the current or most recent run.
  pub fn state(&self) -> RunState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn registry(&self) -> &Registry<S> {
    &self.registry
  }

  pub fn notifier(&self) -> &N {
    &self.notifier
  }

  fn set_state(&self, state: RunState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  /// Run `plan` to completion, failure or cancellation.
  ///
  /// Every operation in the plan must be registered; this is checked before
  /// anything runs. Per-run resources are released before this returns,
  /// and also if the returned future is dropped mid-run.
  #[instrument(
    name = "engine_run",
    skip(self, plan, cancel),
    fields(run_id = tracing::field::Empty, operations = plan.len())
  )]
  pub async fn run(
    &self,
    plan: &ExecutionPlan,
    cancel: CancellationToken,
  ) -> Result<RunOutcome, EngineError> {
    let _guard = RunGuard::acquire(&self.running, &self.state).ok_or(EngineError::AlreadyRunning)?;
    let scheduled = self.schedule(plan)?;

    let run_id = uuid::Uuid::new_v4().to_string();
    Span::current().record("run_id", run_id.as_str());

    self.set_state(RunState::Running);
    info!(run_id = %run_id, operations = plan.len(), "run_started");
    self.notifier.notify(ExecutionEvent::RunStarted {
      run_id: run_id.clone(),
      operations: plan.iter().cloned().collect(),
    });

    let resources = RunResources::new();
    let release = ReleaseOnDrop(resources.clone());
    let outcome = self
      .execute_plan(&run_id, scheduled, &resources, &cancel)
      .await;
    drop(release);

    match &outcome {
      RunOutcome::Completed(summary) => {
        info!(run_id = %run_id, completed = summary.completed.len(), "run_completed");
        self.notifier.notify(ExecutionEvent::RunCompleted {
          run_id: run_id.clone(),
        });
      }
      RunOutcome::Failed(failure) => {
        error!(
          run_id = %run_id,
          operation_id = %failure.operation_id,
          error = %failure.root_cause,
          "run_failed"
        );
        self.notifier.notify(ExecutionEvent::RunFailed {
          run_id: run_id.clone(),
          operation_id: failure.operation_id.clone(),
          error: failure.root_cause.clone(),
        });
      }
      RunOutcome::Cancelled(summary) => {
        warn!(run_id = %run_id, completed = summary.completed.len(), "run_cancelled");
        self.notifier.notify(ExecutionEvent::RunCancelled {
          run_id: run_id.clone(),
        });
      }
    }

    self.set_state(outcome.state());
    Ok(outcome)
  }

  fn schedule(&self, plan: &ExecutionPlan) -> Result<Vec<Scheduled<S>>, EngineError> {
    plan
      .iter()
      .map(|id| {
        self
          .registry
          .operation(id.as_str())
          .map(|operation| (id.clone(), operation))
          .ok_or_else(|| EngineError::UnknownOperation {
            operation_id: id.clone(),
          })
      })
      .collect()
  }

  async fn execute_plan(
    &self,
    run_id: &str,
    scheduled: Vec<Scheduled<S>>,
    resources: &RunResources,
    cancel: &CancellationToken,
  ) -> RunOutcome {
    let mut completed: Vec<OperationId> = Vec::new();

    for (operation_id, operation) in scheduled {
      if cancel.is_cancelled() {
        return RunOutcome::Cancelled(RunSummary {
          run_id: run_id.to_string(),
          completed,
        });
      }

      info!(run_id = %run_id, operation_id = %operation_id, "operation_started");
      self.notifier.notify(ExecutionEvent::OperationStarted {
        run_id: run_id.to_string(),
        operation_id: operation_id.clone(),
      });

      let withheld = Withheld::default();
      let ctx = OperationContext::new(operation_id.clone(), run_id, self.services.clone())
        .with_cancel(cancel.clone())
        .with_reporter(self.reporter(run_id, &operation_id, withheld.clone()))
        .with_resources(resources.clone());

      let error: BoxError = match AssertUnwindSafe(operation.execute(ctx)).catch_unwind().await {
        Ok(Ok(())) => {
          // The final summary often lands inside the throttle window.
          let last = withheld.lock().unwrap_or_else(PoisonError::into_inner).take();
          if let Some(update) = last {
            self
              .notifier
              .notify(progress_event(run_id, &operation_id, update));
          }
          info!(run_id = %run_id, operation_id = %operation_id, "operation_completed");
          self.notifier.notify(ExecutionEvent::OperationCompleted {
            run_id: run_id.to_string(),
            operation_id: operation_id.clone(),
          });
          completed.push(operation_id);
          continue;
        }
        Ok(Err(error)) => error,
        Err(panic) => panic_message(panic.as_ref()).into(),
      };

      // An operation unwinding because of cancellation is not a failure.
      if cancel.is_cancelled() {
        info!(
          run_id = %run_id,
          operation_id = %operation_id,
          reason = %error,
          "operation_stopped"
        );
        return RunOutcome::Cancelled(RunSummary {
          run_id: run_id.to_string(),
          completed,
        });
      }

      let chain = error_chain(&*error);
      let root_cause = chain.last().cloned().unwrap_or_default();
      error!(
        run_id = %run_id,
        operation_id = %operation_id,
        error = %root_cause,
        "operation_failed"
      );
      self.notifier.notify(ExecutionEvent::OperationFailed {
        run_id: run_id.to_string(),
        operation_id: operation_id.clone(),
        error: root_cause.clone(),
      });

      return RunOutcome::Failed(OperationFailure {
        run_id: run_id.to_string(),
        operation_id,
        root_cause,
        chain,
        completed,
      });
    }

    RunOutcome::Completed(RunSummary {
      run_id: run_id.to_string(),
      completed,
    })
  }

  /// A reporter relaying throttled progress for one operation. The most
  /// recent rejected update is kept in `withheld`.
  fn reporter(
    &self,
    run_id: &str,
    operation_id: &OperationId,
    withheld: Withheld,
  ) -> ProgressReporter {
    let throttle = ProgressThrottle::per_second(self.config.max_progress_updates_per_second);
    let notifier = self.notifier.clone();
    let run_id = run_id.to_string();
    let operation_id = operation_id.clone();

    ProgressReporter::new(move |update| {
      let mut held = withheld.lock().unwrap_or_else(PoisonError::into_inner);
      if throttle.admit() {
        *held = None;
        drop(held);
        notifier.notify(progress_event(&run_id, &operation_id, update));
      } else {
        *held = Some(update);
      }
    })
  }
}

fn progress_event(run_id: &str, operation_id: &OperationId, update: ProgressUpdate) -> ExecutionEvent {
  ExecutionEvent::OperationProgress {
    run_id: run_id.to_string(),
    operation_id: operation_id.clone(),
    fraction: update.fraction,
    message: update.message,
  }
}

/// Marks the engine busy for the lifetime of one run.
struct RunGuard<'a> {
  running: &'a AtomicBool,
  state: &'a Mutex<RunState>,
}

impl<'a> RunGuard<'a> {
  fn acquire(running: &'a AtomicBool, state: &'a Mutex<RunState>) -> Option<Self> {
    running
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()?;
    Some(Self { running, state })
  }
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    // Still running here means the run future was dropped before finishing.
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if *state == RunState::Running {
      *state = RunState::Cancelled;
    }
    self.running.store(false, Ordering::Release);
  }
}

struct ReleaseOnDrop(RunResources);

impl Drop for ReleaseOnDrop {
  fn drop(&mut self) {
    self.0.release_all();
  }
}

/// Messages of `error` and its sources, outermost first.
fn error_chain(error: &(dyn Error + 'static)) -> Vec<String> {
  let mut chain = Vec::new();
  let mut current = Some(error);
  while let Some(err) = current {
    chain.push(err.to_string());
    current = err.source();
  }
  chain
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  let message = payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "unknown panic".to_string());
  format!("operation panicked: {message}")
}

#[cfg(test)]
mod tests {
  use super::*;
  use janitor_catalog::OperationDescriptor;
  use janitor_operation::{OperationError, from_fn};
  use janitor_resolver::order;
  use std::sync::atomic::AtomicUsize;
  use tokio::sync::{Notify, mpsc};

  use crate::events::ChannelNotifier;

  #[derive(Debug, thiserror::Error)]
  #[error("could not rewrite blob")]
  struct RewriteError {
    #[source]
    source: std::io::Error,
  }

  fn plan_for(registry: &Registry<()>) -> ExecutionPlan {
    order(registry.descriptors()).unwrap()
  }

  fn counting(counter: Arc<AtomicUsize>) -> impl Operation<()> {
    from_fn(move |_ctx: OperationContext<()>| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok::<(), BoxError>(())
      }
    })
  }

  fn engine_with_events(
    registry: Registry<()>,
  ) -> (Engine<(), ChannelNotifier>, mpsc::UnboundedReceiver<ExecutionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let engine = Engine::with_notifier(Arc::new(registry), (), ChannelNotifier::new(tx));
    (engine, rx)
  }

  fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
      events.push(event);
    }
    events
  }

  #[tokio::test]
  async fn test_runs_plan_in_order() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("second").after("first").build(),
        counting(counter.clone()),
      )
      .unwrap()
      .register(OperationDescriptor::builder("first").build(), counting(counter.clone()))
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let (engine, mut rx) = engine_with_events(registry);
    assert_eq!(engine.state(), RunState::Idle);

    let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(outcome.completed(), [OperationId::new("first"), OperationId::new("second")]);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(engine.state(), RunState::Completed);

    let events = drain(&mut rx);
    let run_id = outcome.run_id().to_string();
    assert!(events.iter().all(|e| e.run_id() == run_id));
    assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
    assert!(matches!(events.last(), Some(ExecutionEvent::RunCompleted { .. })));
    let started: Vec<_> = events
      .iter()
      .filter_map(|e| match e {
        ExecutionEvent::OperationStarted { operation_id, .. } => Some(operation_id.as_str()),
        _ => None,
      })
      .collect();
    assert_eq!(started, vec!["first", "second"]);
  }

  #[tokio::test]
  async fn test_unregistered_operation_is_rejected_before_running() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = Registry::builder()
      .register(OperationDescriptor::builder("known").build(), counting(counter.clone()))
      .unwrap()
      .build();
    let descriptors = [
      OperationDescriptor::builder("known").build(),
      OperationDescriptor::builder("ghost").build(),
    ];
    let plan = order(&descriptors).unwrap();
    let engine = Engine::new(Arc::new(registry), ());

    let result = engine.run(&plan, CancellationToken::new()).await;
    assert!(matches!(
      result,
      Err(EngineError::UnknownOperation { operation_id }) if operation_id == "ghost"
    ));
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(engine.state(), RunState::Idle);
  }

  #[tokio::test]
  async fn test_root_cause_is_surfaced() {
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("rewrite").build(),
        from_fn(|_ctx: OperationContext<()>| async {
          let err = RewriteError {
            source: std::io::Error::other("disk full"),
          };
          Err::<(), BoxError>(Box::new(err))
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let engine = Engine::new(Arc::new(registry), ());

    let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.operation_id, "rewrite");
    assert_eq!(failure.root_cause, "disk full");
    assert_eq!(failure.chain, vec!["could not rewrite blob", "disk full"]);
    assert_eq!(engine.state(), RunState::Failed);
  }

  #[tokio::test]
  async fn test_panic_is_reported_as_failure() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("explodes").build(),
        from_fn(|ctx: OperationContext<()>| async move {
          if !ctx.is_cancelled() {
            panic!("corrupt index");
          }
          Ok::<(), BoxError>(())
        }),
      )
      .unwrap()
      .register(
        OperationDescriptor::builder("after").after("explodes").build(),
        counting(counter.clone()),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let engine = Engine::new(Arc::new(registry), ());

    let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.operation_id, "explodes");
    assert_eq!(failure.root_cause, "operation panicked: corrupt index");
    assert_eq!(counter.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_cancelled_before_start_runs_nothing() {
    let counter = Arc::new(AtomicUsize::new(0));
    let registry = Registry::builder()
      .register(OperationDescriptor::builder("a").build(), counting(counter.clone()))
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let (engine, mut rx) = engine_with_events(registry);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = engine.run(&plan, cancel).await.unwrap();

    assert!(outcome.is_cancelled());
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    assert_eq!(engine.state(), RunState::Cancelled);
    assert!(matches!(drain(&mut rx).last(), Some(ExecutionEvent::RunCancelled { .. })));
  }

  #[tokio::test]
  async fn test_operation_observing_cancel_ends_run_cancelled() {
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("long").build(),
        from_fn(|ctx: OperationContext<()>| async move {
          ctx.cancel().cancel();
          ctx.checkpoint()?;
          Ok::<(), BoxError>(())
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let engine = Engine::new(Arc::new(registry), ());

    let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();
    assert!(outcome.is_cancelled());
    assert!(outcome.completed().is_empty());
  }

  #[tokio::test]
  async fn test_second_concurrent_run_is_refused() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let (op_entered, op_release) = (entered.clone(), release.clone());

    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("slow").build(),
        from_fn(move |_ctx: OperationContext<()>| {
          let (entered, release) = (op_entered.clone(), op_release.clone());
          async move {
            entered.notify_one();
            release.notified().await;
            Ok::<(), BoxError>(())
          }
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let engine = Arc::new(Engine::new(Arc::new(registry), ()));

    let first = {
      let (engine, plan) = (engine.clone(), plan.clone());
      tokio::spawn(async move { engine.run(&plan, CancellationToken::new()).await })
    };
    entered.notified().await;
    assert_eq!(engine.state(), RunState::Running);

    let second = engine.run(&plan, CancellationToken::new()).await;
    assert!(matches!(second, Err(EngineError::AlreadyRunning)));

    release.notify_one();
    assert!(first.await.unwrap().unwrap().is_completed());

    // The engine is reusable once the run ends.
    release.notify_one();
    assert!(engine.run(&plan, CancellationToken::new()).await.unwrap().is_completed());
  }

  #[tokio::test]
  async fn test_resources_released_on_failure() {
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();

    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("holds-handle").build(),
        from_fn(move |ctx: OperationContext<()>| {
          let counter = counter.clone();
          async move {
            ctx.resources().register("store-handle", move || {
              counter.fetch_add(1, Ordering::SeqCst);
              Ok(())
            });
            Err::<(), BoxError>(OperationError::record("blob-7", "checksum mismatch").into())
          }
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let engine = Engine::new(Arc::new(registry), ());

    let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();
    assert!(outcome.failure().is_some());
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_progress_is_throttled() {
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("chatty").build(),
        from_fn(|ctx: OperationContext<()>| async move {
          for i in 0..1_000 {
            ctx.report(Some(i as f64 / 1_000.0), None);
          }
          Ok::<(), BoxError>(())
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let (engine, mut rx) = engine_with_events(registry);
    let engine = engine.with_config(EngineConfig {
      max_progress_updates_per_second: 10,
    });

    engine.run(&plan, CancellationToken::new()).await.unwrap();

    let progress: Vec<_> = drain(&mut rx)
      .into_iter()
      .filter_map(|e| match e {
        ExecutionEvent::OperationProgress { fraction, .. } => Some(fraction),
        _ => None,
      })
      .collect();
    assert!(!progress.is_empty());
    assert!(progress.len() <= 3, "{} progress events forwarded", progress.len());
    assert_eq!(progress[0], Some(0.0));
    assert_eq!(progress.last(), Some(&Some(0.999)));
  }

  #[tokio::test]
  async fn test_final_status_survives_throttle() {
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("compact").build(),
        from_fn(|ctx: OperationContext<()>| async move {
          ctx.status("compacting store");
          ctx.report(Some(1.0), Some("reclaimed 512 bytes".to_string()));
          Ok::<(), BoxError>(())
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let (engine, mut rx) = engine_with_events(registry);
    let engine = engine.with_config(EngineConfig {
      max_progress_updates_per_second: 1,
    });

    engine.run(&plan, CancellationToken::new()).await.unwrap();

    let events = drain(&mut rx);
    let completed = events
      .iter()
      .position(|e| matches!(e, ExecutionEvent::OperationCompleted { .. }))
      .unwrap();
    let messages: Vec<_> = events[..completed]
      .iter()
      .filter_map(|e| match e {
        ExecutionEvent::OperationProgress { message, .. } => message.as_deref(),
        _ => None,
      })
      .collect();
    assert_eq!(messages, vec!["compacting store", "reclaimed 512 bytes"]);
  }

  #[tokio::test]
  async fn test_withheld_progress_is_not_flushed_on_failure() {
    let registry = Registry::builder()
      .register(
        OperationDescriptor::builder("verify").build(),
        from_fn(|ctx: OperationContext<()>| async move {
          ctx.status("verifying");
          ctx.status("3 corrupt blobs");
          Err::<(), BoxError>(OperationError::record("blob-3", "unreadable").into())
        }),
      )
      .unwrap()
      .build();
    let plan = plan_for(&registry);
    let (engine, mut rx) = engine_with_events(registry);
    let engine = engine.with_config(EngineConfig {
      max_progress_updates_per_second: 1,
    });

    engine.run(&plan, CancellationToken::new()).await.unwrap();

    let progress = drain(&mut rx)
      .into_iter()
      .filter(|e| matches!(e, ExecutionEvent::OperationProgress { .. }))
      .count();
    assert_eq!(progress, 1);
  }

  #[test]
  fn test_error_chain_walks_sources() {
    let err = RewriteError {
      source: std::io::Error::other("disk full"),
    };
    assert_eq!(error_chain(&err), vec!["could not rewrite blob", "disk full"]);
  }
}
