use std::sync::Arc;

use async_trait::async_trait;
use janitor_operation::{BoxError, Operation, OperationContext};
use janitor_pipeline::ConsumerPool;
use tracing::info;

use super::{Services, stream_ids};

/// Deletes blobs that no record refers to.
///
/// Holds a store maintenance lease for the rest of the run.
pub struct PurgeOrphans;

#[async_trait]
impl Operation<Services> for PurgeOrphans {
  async fn execute(&self, ctx: OperationContext<Services>) -> Result<(), BoxError> {
    let services = ctx.services();
    let store = services.store.clone();

    store.acquire_lease();
    let lease = store.clone();
    ctx.resources().register("purge-lease", move || {
      lease.release_lease();
      Ok(())
    });

    let orphans = store.orphan_ids();
    let total = orphans.len();
    let progress = Arc::new(ctx.reporter().aggregator(total as u64));
    let source = stream_ids(orphans, services.pipeline.queue_capacity)?;

    ConsumerPool::new(source)
      .concurrency(services.pipeline.concurrency)
      .run(
        move |id: u64| {
          let (store, progress) = (store.clone(), progress.clone());
          async move {
            store.remove_blob(id);
            progress.add(1);
            Ok::<(), BoxError>(())
          }
        },
        ctx.cancel(),
      )
      .await?;

    info!(operation_id = %ctx.operation_id(), purged = total, "orphans_purged");
    ctx.status(format!("{total} orphans purged"));
    Ok(())
  }
}
