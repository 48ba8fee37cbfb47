use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use janitor_operation::{BoxError, Operation, OperationContext, OperationError};
use janitor_pipeline::{BoundedProducer, ConsumerPool, ProducerHandle};
use thiserror::Error;
use tracing::info;

use super::Services;
use crate::store::Place;

#[derive(Debug, Error)]
pub enum GeocodeError {
  #[error("geocoding credentials rejected")]
  Unauthorized,

  #[error("no match for '{query}'")]
  NotFound { query: String },
}

/// Resolves place names to coordinates.
///
/// Lookups are deterministic: coordinates are derived from the name, so runs
/// are reproducible without network access.
pub struct Geocoder {
  api_key: String,
}

impl Geocoder {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      api_key: api_key.into(),
    }
  }

  pub async fn lookup(&self, name: &str) -> Result<(f64, f64), GeocodeError> {
    if self.api_key.is_empty() {
      return Err(GeocodeError::Unauthorized);
    }
    if name.trim().is_empty() {
      return Err(GeocodeError::NotFound {
        query: name.to_string(),
      });
    }

    let hash = crate::store::checksum(name.as_bytes());
    let latitude = (hash % 18_000) as f64 / 100.0 - 90.0;
    let longitude = ((hash / 18_000) % 36_000) as f64 / 100.0 - 180.0;
    Ok((latitude, longitude))
  }
}

impl fmt::Debug for Geocoder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Geocoder").field("api_key", &"<redacted>").finish()
  }
}

/// Fills in coordinates for places that have none.
pub struct GeocodePlaces;

#[async_trait]
impl Operation<Services> for GeocodePlaces {
  async fn execute(&self, ctx: OperationContext<Services>) -> Result<(), BoxError> {
    let services = ctx.services();
    let geocoder = services
      .geocoder
      .clone()
      .ok_or_else(|| OperationError::service("geocoder", "no geocoding credentials configured"))?;

    let places = Arc::new(services.store.places_without_coordinates());
    let progress = Arc::new(ctx.reporter().aggregator(places.len() as u64));

    let pending = places.clone();
    let source = BoundedProducer::generate(
      services.pipeline.queue_capacity,
      1,
      move |handle: ProducerHandle<Place>| {
        let pending = pending.clone();
        async move {
          for place in pending.iter() {
            handle.enqueue(place.clone()).await?;
          }
          Ok::<(), BoxError>(())
        }
      },
    )?;

    let store = services.store.clone();
    ConsumerPool::new(source)
      .concurrency(services.pipeline.concurrency)
      .run(
        move |place: Place| {
          let (geocoder, store, progress) = (geocoder.clone(), store.clone(), progress.clone());
          async move {
            let coordinates = geocoder
              .lookup(&place.name)
              .await
              .map_err(|e| OperationError::service("geocoder", e))?;
            store.set_coordinates(place.id, coordinates);
            progress.add(1);
            Ok::<(), BoxError>(())
          }
        },
        ctx.cancel(),
      )
      .await?;

    info!(operation_id = %ctx.operation_id(), geocoded = places.len(), "places_geocoded");
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{GeocodingConfig, JanitorConfig};
  use crate::store::RecordStore;
  use janitor_operation::OperationId;

  fn context(store: &Arc<RecordStore>, api_key: Option<&str>) -> OperationContext<Services> {
    let config = JanitorConfig {
      geocoding: api_key.map(|key| GeocodingConfig {
        api_key: key.to_string(),
      }),
      ..JanitorConfig::default()
    };
    let services = Services::new(store.clone(), &config);
    OperationContext::new(OperationId::new("geocode-places"), "run-1", services)
  }

  #[tokio::test]
  async fn test_lookup_is_deterministic_and_in_range() {
    let geocoder = Geocoder::new("key");
    let (lat, lon) = geocoder.lookup("Lisbon").await.unwrap();
    assert_eq!(geocoder.lookup("Lisbon").await.unwrap(), (lat, lon));
    assert!((-90.0..=90.0).contains(&lat));
    assert!((-180.0..=180.0).contains(&lon));
    assert!(matches!(
      geocoder.lookup(" ").await,
      Err(GeocodeError::NotFound { .. })
    ));
  }

  #[tokio::test]
  async fn test_geocodes_missing_coordinates() {
    let store = Arc::new(RecordStore::seeded(100));
    GeocodePlaces
      .execute(context(&store, Some("key")))
      .await
      .unwrap();
    assert!(store.places_without_coordinates().is_empty());
  }

  #[tokio::test]
  async fn test_rejected_credentials_fail_with_root_cause() {
    let store = Arc::new(RecordStore::seeded(100));
    let err = GeocodePlaces
      .execute(context(&store, Some("")))
      .await
      .unwrap_err();

    let mut root: &(dyn std::error::Error + 'static) = &*err;
    while let Some(source) = root.source() {
      root = source;
    }
    assert_eq!(root.to_string(), "geocoding credentials rejected");
  }

  #[tokio::test]
  async fn test_missing_geocoder_is_a_service_error() {
    let store = Arc::new(RecordStore::seeded(100));
    let err = GeocodePlaces.execute(context(&store, None)).await.unwrap_err();
    assert!(matches!(
      err.downcast_ref::<OperationError>(),
      Some(OperationError::Service { .. })
    ));
  }

  #[test]
  fn test_debug_hides_api_key() {
    let debug = format!("{:?}", Geocoder::new("secret"));
    assert!(!debug.contains("secret"));
  }
}
