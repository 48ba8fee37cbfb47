//! Built-in maintenance operations over the in-memory record store.
//!
//! Each operation is registered with a descriptor declaring its ordering,
//! exclusion and capability constraints; see [`registry`].

mod compact;
mod geocode;
mod placeholders;
mod purge;
mod relink;
mod verify;

use std::path::PathBuf;
use std::sync::Arc;

use janitor_catalog::{Capability, CatalogError, OperationDescriptor, Registry};
use janitor_operation::BoxError;
use janitor_pipeline::{BoundedProducer, PipelineError, ProducerHandle};

use crate::config::{JanitorConfig, PipelineConfig, PlaceholderConfig};
use crate::store::RecordStore;

pub(crate) use geocode::Geocoder;

pub const VERIFY_CHECKSUMS: &str = "verify-checksums";
pub const REGENERATE_PLACEHOLDERS: &str = "regenerate-placeholders";
pub const PURGE_ORPHANS: &str = "purge-orphans";
pub const COMPACT_STORE: &str = "compact-store";
pub const GEOCODE_PLACES: &str = "geocode-places";
pub const RELINK_EXTERNAL_FILES: &str = "relink-external-files";

/// Collaborators handed to every operation.
#[derive(Debug, Clone)]
pub struct Services {
  pub store: Arc<RecordStore>,
  pub pipeline: PipelineConfig,
  pub placeholder: PlaceholderConfig,
  pub file_root: Option<PathBuf>,
  pub geocoder: Option<Arc<Geocoder>>,
}

impl Services {
  pub fn new(store: Arc<RecordStore>, config: &JanitorConfig) -> Self {
    Self {
      store,
      pipeline: config.pipeline.clone(),
      placeholder: config.placeholder,
      file_root: config.file_root.clone(),
      geocoder: config
        .geocoding
        .as_ref()
        .map(|geocoding| Arc::new(Geocoder::new(geocoding.api_key.clone()))),
    }
  }
}

/// The catalog of built-in operations.
pub fn registry() -> Result<Registry<Services>, CatalogError> {
  let registry = Registry::builder()
    .register(
      OperationDescriptor::builder(VERIFY_CHECKSUMS)
        .title("Verify checksums")
        .category("Integrity")
        .description("Recompute blob checksums and flag mismatches as corrupt")
        .selected_by_default(true)
        .build(),
      verify::VerifyChecksums,
    )?
    .register(
      OperationDescriptor::builder(REGENERATE_PLACEHOLDERS)
        .title("Regenerate placeholders")
        .category("Media")
        .description("Rebuild preview placeholders for every intact blob")
        .selected_by_default(true)
        .after(VERIFY_CHECKSUMS)
        .build(),
      placeholders::RegeneratePlaceholders,
    )?
    .register(
      OperationDescriptor::builder(PURGE_ORPHANS)
        .title("Purge orphans")
        .category("Storage")
        .description("Delete blobs no record refers to")
        .selected_by_default(true)
        .after(VERIFY_CHECKSUMS)
        .build(),
      purge::PurgeOrphans,
    )?
    .register(
      OperationDescriptor::builder(COMPACT_STORE)
        .title("Compact store")
        .category("Storage")
        .description("Drop corrupt blobs and reclaim unused space")
        .after(PURGE_ORPHANS)
        .conflicts_with(REGENERATE_PLACEHOLDERS)
        .build(),
      compact::CompactStore,
    )?
    .register(
      OperationDescriptor::builder(GEOCODE_PLACES)
        .title("Geocode places")
        .category("Metadata")
        .description("Look up coordinates for places that have none")
        .selected_by_default(true)
        .requires(Capability::NETWORK_GEOCODING)
        .build(),
      geocode::GeocodePlaces,
    )?
    .register(
      OperationDescriptor::builder(RELINK_EXTERNAL_FILES)
        .title("Relink external files")
        .category("Storage")
        .description("Resolve external file references against the file root")
        .selected_by_default(true)
        .requires(Capability::EXTERNAL_FILE_ROOT)
        .build(),
      relink::RelinkExternalFiles,
    )?
    .build();
  Ok(registry)
}

/// A producer streaming `ids` through a single generator worker.
fn stream_ids(ids: Vec<u64>, capacity: usize) -> Result<BoundedProducer<u64>, PipelineError> {
  let ids = Arc::new(ids);
  BoundedProducer::generate(capacity, 1, move |handle: ProducerHandle<u64>| {
    let ids = ids.clone();
    async move {
      for id in ids.iter() {
        handle.enqueue(*id).await?;
      }
      Ok::<(), BoxError>(())
    }
  })
}
