use async_trait::async_trait;
use janitor_operation::{BoxError, Operation, OperationContext};
use tracing::info;

use super::Services;

/// Drops corrupt blobs and reclaims spare capacity in one blocking pass.
pub struct CompactStore;

#[async_trait]
impl Operation<Services> for CompactStore {
  async fn execute(&self, ctx: OperationContext<Services>) -> Result<(), BoxError> {
    ctx.checkpoint()?;
    ctx.status("compacting store");

    let store = ctx.services().store.clone();
    let reclaimed = tokio::task::spawn_blocking(move || store.compact()).await?;

    info!(operation_id = %ctx.operation_id(), reclaimed_bytes = reclaimed, "store_compacted");
    ctx.report(Some(1.0), Some(format!("reclaimed {reclaimed} bytes")));
    Ok(())
  }
}
