//! End-to-end runs of pipeline-driven operations through the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use janitor_catalog::{OperationDescriptor, Registry};
use janitor_engine::{
  Engine, EngineConfig, EngineRunner, ExecutionEvent, ExecutionNotifier, RunOutcome, RunState,
};
use janitor_operation::{BoxError, Operation, OperationContext, from_fn};
use janitor_pipeline::{BoundedProducer, ConsumerPool, ProducerHandle};
use janitor_resolver::{ExecutionPlan, order};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Streams `total` records through a producer/consumer pair, failing on
/// `fail_at` if given, and registers one releasable resource.
fn scan(total: u64, fail_at: Option<u64>, released: Arc<AtomicUsize>) -> impl Operation<()> {
  from_fn(move |ctx: OperationContext<()>| {
    let released = released.clone();
    async move {
      ctx.resources().register("scan-cursor", move || {
        released.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });

      let producer = BoundedProducer::generate(4, 1, move |handle: ProducerHandle<u64>| async move {
        for record in 0..total {
          handle.enqueue(record).await?;
        }
        Ok::<(), BoxError>(())
      })?;

      let progress = Arc::new(ctx.reporter().aggregator(total));
      ConsumerPool::new(producer)
        .concurrency(1)
        .run(
          move |record: u64| {
            let progress = progress.clone();
            async move {
              if Some(record) == fail_at {
                return Err(BoxError::from(format!("record {record} is corrupt")));
              }
              progress.add(1);
              Ok(())
            }
          },
          ctx.cancel(),
        )
        .await?;
      Ok::<(), BoxError>(())
    }
  })
}

/// Feeds records until cancelled.
fn endless() -> impl Operation<()> {
  from_fn(|ctx: OperationContext<()>| async move {
    let producer = BoundedProducer::generate(2, 2, |handle: ProducerHandle<u64>| async move {
      let mut record = 0;
      while !handle.is_cancelled() {
        handle.enqueue(record).await?;
        record += 1;
      }
      Ok::<(), BoxError>(())
    })?;
    ConsumerPool::new(producer)
      .concurrency(2)
      .run(
        |_record: u64| async {
          tokio::time::sleep(Duration::from_millis(1)).await;
          Ok::<(), BoxError>(())
        },
        ctx.cancel(),
      )
      .await?;
    Ok::<(), BoxError>(())
  })
}

struct Recorder(mpsc::UnboundedSender<ExecutionEvent>);

impl ExecutionNotifier for Recorder {
  fn notify(&self, event: ExecutionEvent) {
    let _ = self.0.send(event);
  }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
  let mut events = Vec::new();
  while let Ok(event) = rx.try_recv() {
    events.push(event);
  }
  events
}

fn started(events: &[ExecutionEvent]) -> Vec<&str> {
  events
    .iter()
    .filter_map(|e| match e {
      ExecutionEvent::OperationStarted { operation_id, .. } => Some(operation_id.as_str()),
      _ => None,
    })
    .collect()
}

fn plan_for(registry: &Registry<()>) -> ExecutionPlan {
  order(registry.descriptors()).unwrap()
}

#[tokio::test]
async fn test_failure_midway_stops_the_run() {
  let released = Arc::new(AtomicUsize::new(0));
  let registry = Registry::builder()
    .register(
      OperationDescriptor::builder("scan").build(),
      scan(10, Some(4), released.clone()),
    )
    .unwrap()
    .register(
      OperationDescriptor::builder("compact").after("scan").build(),
      scan(3, None, released.clone()),
    )
    .unwrap()
    .build();
  let plan = plan_for(&registry);

  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = Engine::with_notifier(Arc::new(registry), (), Recorder(tx)).with_config(EngineConfig {
    max_progress_updates_per_second: 0,
  });

  let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();

  let failure = outcome.failure().expect("run should fail");
  assert_eq!(failure.operation_id, "scan");
  assert_eq!(failure.root_cause, "record 4 is corrupt");
  assert!(failure.completed.is_empty());
  assert_eq!(engine.state(), RunState::Failed);
  assert_eq!(released.load(Ordering::SeqCst), 1);

  let events = drain(&mut rx);
  assert_eq!(started(&events), vec!["scan"]);

  let last_progress = events
    .iter()
    .rev()
    .find_map(|e| match e {
      ExecutionEvent::OperationProgress { fraction, .. } => Some(*fraction),
      _ => None,
    })
    .flatten();
  assert_eq!(last_progress, Some(0.4));

  assert!(matches!(
    events.last(),
    Some(ExecutionEvent::RunFailed { operation_id, error, .. })
      if operation_id == "scan" && error == "record 4 is corrupt"
  ));
}

#[tokio::test]
async fn test_cancel_after_first_operation() {
  let released = Arc::new(AtomicUsize::new(0));
  let registry = Registry::builder()
    .register(
      OperationDescriptor::builder("first").build(),
      scan(5, None, released.clone()),
    )
    .unwrap()
    .register(OperationDescriptor::builder("second").after("first").build(), endless())
    .unwrap()
    .register(
      OperationDescriptor::builder("third").after("second").build(),
      scan(5, None, released.clone()),
    )
    .unwrap()
    .build();
  let plan = plan_for(&registry);
  assert_eq!(plan.to_string(), "first -> second -> third");

  let runner = EngineRunner::new(Arc::new(registry), ());
  let mut handle = runner.spawn(plan, CancellationToken::new()).unwrap();

  let mut events = Vec::new();
  while let Some(event) = handle.next_event().await {
    if matches!(&event, ExecutionEvent::OperationCompleted { operation_id, .. } if operation_id == "first") {
      handle.cancel();
    }
    events.push(event);
  }

  let outcome = handle.wait().await.unwrap();
  assert!(outcome.is_cancelled());
  assert_eq!(outcome.completed(), ["first"]);
  assert!(!started(&events).contains(&"third"));
  assert!(matches!(events.last(), Some(ExecutionEvent::RunCancelled { .. })));
  assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_completed_run_reports_every_operation() {
  let released = Arc::new(AtomicUsize::new(0));
  let registry = Registry::builder()
    .register(
      OperationDescriptor::builder("verify").build(),
      scan(20, None, released.clone()),
    )
    .unwrap()
    .register(
      OperationDescriptor::builder("purge").after("verify").build(),
      scan(20, None, released.clone()),
    )
    .unwrap()
    .build();
  let plan = plan_for(&registry);
  let engine = Engine::new(Arc::new(registry), ());

  let outcome = engine.run(&plan, CancellationToken::new()).await.unwrap();
  match outcome {
    RunOutcome::Completed(summary) => assert_eq!(summary.completed, ["verify", "purge"]),
    other => panic!("unexpected outcome {other:?}"),
  }
  assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dropped_run_releases_resources() {
  let released = Arc::new(AtomicUsize::new(0));
  let counter = released.clone();
  let registry = Registry::builder()
    .register(
      OperationDescriptor::builder("hangs").build(),
      from_fn(move |ctx: OperationContext<()>| {
        let counter = counter.clone();
        async move {
          ctx.resources().register("lock-file", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
          });
          std::future::pending::<()>().await;
          Ok::<(), BoxError>(())
        }
      }),
    )
    .unwrap()
    .build();
  let plan = plan_for(&registry);
  let engine = Engine::new(Arc::new(registry), ());

  let result = tokio::time::timeout(
    Duration::from_millis(50),
    engine.run(&plan, CancellationToken::new()),
  )
  .await;
  assert!(result.is_err());
  assert_eq!(released.load(Ordering::SeqCst), 1);
  assert_eq!(engine.state(), RunState::Cancelled);
}
