use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use janitor_operation::{BoxError, Operation, OperationContext, OperationError};
use janitor_pipeline::{BoundedProducer, ConsumerPool, ProducerHandle};
use tracing::{info, warn};

use super::Services;
use crate::store::ExternalFile;

/// Resolves external file references against the configured file root.
///
/// Files absent from the root stay unlinked; they are counted, not failed.
pub struct RelinkExternalFiles;

#[async_trait]
impl Operation<Services> for RelinkExternalFiles {
  async fn execute(&self, ctx: OperationContext<Services>) -> Result<(), BoxError> {
    let services = ctx.services();
    let root = services
      .file_root
      .clone()
      .ok_or_else(|| OperationError::service("file-root", "no file root configured"))?;
    let root = Arc::new(root);

    let files = Arc::new(services.store.unlinked_files());
    let progress = Arc::new(ctx.reporter().aggregator(files.len() as u64));
    let missing = Arc::new(AtomicUsize::new(0));

    let pending = files.clone();
    let source = BoundedProducer::generate(
      services.pipeline.queue_capacity,
      1,
      move |handle: ProducerHandle<ExternalFile>| {
        let pending = pending.clone();
        async move {
          for file in pending.iter() {
            handle.enqueue(file.clone()).await?;
          }
          Ok::<(), BoxError>(())
        }
      },
    )?;

    let (store, counter) = (services.store.clone(), missing.clone());
    ConsumerPool::new(source)
      .concurrency(services.pipeline.concurrency)
      .run(
        move |file: ExternalFile| {
          let (root, store, progress, counter) =
            (root.clone(), store.clone(), progress.clone(), counter.clone());
          async move {
            let candidate = root.join(&file.file_name);
            let exists = tokio::fs::try_exists(&candidate)
              .await
              .map_err(|e| OperationError::service("file-root", e))?;
            if exists {
              store.set_location(file.id, candidate);
            } else {
              counter.fetch_add(1, Ordering::Relaxed);
            }
            progress.add(1);
            Ok::<(), BoxError>(())
          }
        },
        ctx.cancel(),
      )
      .await?;

    let missing = missing.load(Ordering::Relaxed);
    if missing > 0 {
      warn!(operation_id = %ctx.operation_id(), missing, "external_files_missing");
    }
    info!(
      operation_id = %ctx.operation_id(),
      relinked = files.len() - missing,
      "external_files_relinked"
    );
    Ok(())
  }
}
