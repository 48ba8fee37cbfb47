use std::sync::Arc;

use async_trait::async_trait;
use janitor_operation::{BoxError, Operation, OperationContext};
use janitor_pipeline::{ConsumerPool, Pipe};
use tracing::info;

use super::{Services, stream_ids};
use crate::store::Placeholder;

/// Longest edge of a generated placeholder.
const PLACEHOLDER_EDGE: u32 = 64;

/// Rebuilds placeholders for intact blobs.
///
/// A pipe decodes dimensions (falling back to the configured size when the
/// header is unreadable) and a consumer pool writes the placeholders back.
pub struct RegeneratePlaceholders;

#[async_trait]
impl Operation<Services> for RegeneratePlaceholders {
  async fn execute(&self, ctx: OperationContext<Services>) -> Result<(), BoxError> {
    let services = ctx.services();
    let ids = services.store.blob_ids();
    let progress = Arc::new(ctx.reporter().aggregator(ids.len() as u64));
    let source = stream_ids(ids, services.pipeline.queue_capacity)?;

    let (store, fallback) = (services.store.clone(), services.placeholder);
    let decoded = Pipe::new(
      source,
      services.pipeline.queue_capacity,
      services.pipeline.concurrency,
      move |id: u64| {
        let (store, progress) = (store.clone(), progress.clone());
        async move {
          progress.add(1);
          let Some(blob) = store.blob(id) else {
            return Ok(None);
          };
          if blob.corrupt {
            return Ok(None);
          }
          let (width, height) = blob
            .dimensions()
            .unwrap_or((fallback.fallback_width, fallback.fallback_height));
          Ok::<_, BoxError>(Some((id, scale_to_fit(width, height, PLACEHOLDER_EDGE))))
        }
      },
    )?;

    let store = services.store.clone();
    ConsumerPool::new(decoded)
      .concurrency(services.pipeline.concurrency)
      .run(
        move |(id, placeholder): (u64, Placeholder)| {
          let store = store.clone();
          async move {
            store.set_placeholder(id, placeholder);
            Ok::<(), BoxError>(())
          }
        },
        ctx.cancel(),
      )
      .await?;

    info!(operation_id = %ctx.operation_id(), "placeholders_regenerated");
    Ok(())
  }
}

/// Scale `width` x `height` so the longer edge equals `edge`, keeping the
/// aspect ratio. Neither side drops below one pixel.
fn scale_to_fit(width: u32, height: u32, edge: u32) -> Placeholder {
  let longest = width.max(height).max(1) as u64;
  let scale = |side: u32| ((side as u64 * edge as u64) / longest).max(1) as u32;
  Placeholder {
    width: scale(width),
    height: scale(height),
  }
}
