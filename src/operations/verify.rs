use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use janitor_operation::{BoxError, Operation, OperationContext};
use janitor_pipeline::ConsumerPool;
use tracing::{debug, info};

use super::{Services, stream_ids};

/// Recomputes every blob checksum and flags mismatching blobs as corrupt.
pub struct VerifyChecksums;

#[async_trait]
impl Operation<Services> for VerifyChecksums {
  async fn execute(&self, ctx: OperationContext<Services>) -> Result<(), BoxError> {
    let services = ctx.services();
    let store = services.store.clone();
    let ids = store.blob_ids();
    let progress = Arc::new(ctx.reporter().aggregator(ids.len() as u64));
    let corrupt = Arc::new(AtomicUsize::new(0));

    let source = stream_ids(ids, services.pipeline.queue_capacity)?;
    let counter = corrupt.clone();
    ConsumerPool::new(source)
      .concurrency(services.pipeline.concurrency)
      .run(
        move |id: u64| {
          let (store, progress, counter) = (store.clone(), progress.clone(), counter.clone());
          async move {
            if store.verify_blob(id) == Some(false) {
              debug!(blob_id = id, "checksum_mismatch");
              counter.fetch_add(1, Ordering::Relaxed);
            }
            progress.add(1);
            Ok::<(), BoxError>(())
          }
        },
        ctx.cancel(),
      )
      .await?;

    let corrupt = corrupt.load(Ordering::Relaxed);
    info!(operation_id = %ctx.operation_id(), corrupt, "checksums_verified");
    ctx.status(format!("{corrupt} corrupt blobs"));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::JanitorConfig;
  use crate::store::RecordStore;
  use janitor_operation::OperationId;

  #[tokio::test]
  async fn test_flags_every_mismatch() {
    let store = Arc::new(RecordStore::seeded(100));
    let services = Services::new(store.clone(), &JanitorConfig::default());
    let ctx = OperationContext::new(OperationId::new("verify-checksums"), "run-1", services);

    VerifyChecksums.execute(ctx).await.unwrap();

    let expected = (0..100).filter(|i| i % 11 == 5).count();
    assert_eq!(store.corrupt_count(), expected);
  }
}
