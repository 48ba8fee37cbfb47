//! In-memory record store the built-in operations maintain.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Scaled-down preview of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
  pub width: u32,
  pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
  pub id: u64,
  pub data: Vec<u8>,
  /// Checksum recorded when the blob was written.
  pub checksum: u32,
  /// Whether any record still points at this blob.
  pub referenced: bool,
  pub corrupt: bool,
  pub placeholder: Option<Placeholder>,
}

impl Blob {
  /// Dimensions encoded in the blob header, if it has a readable one.
  ///
  /// The header is `b"IMG"` followed by big-endian `u16` width and height.
  pub fn dimensions(&self) -> Option<(u32, u32)> {
    match self.data.as_slice() {
      [b'I', b'M', b'G', w0, w1, h0, h1, ..] => {
        let width = u16::from_be_bytes([*w0, *w1]) as u32;
        let height = u16::from_be_bytes([*h0, *h1]) as u32;
        (width > 0 && height > 0).then_some((width, height))
      }
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
  pub id: u64,
  pub name: String,
  pub coordinates: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFile {
  pub id: u64,
  pub file_name: String,
  /// Resolved location, once relinked against the file root.
  pub location: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Tables {
  blobs: BTreeMap<u64, Blob>,
  places: BTreeMap<u64, Place>,
  files: BTreeMap<u64, ExternalFile>,
}

/// Thread-safe store of blobs, places and external file references.
#[derive(Debug, Default)]
pub struct RecordStore {
  tables: Mutex<Tables>,
  leases: AtomicUsize,
}

impl RecordStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A store with `records` blobs plus a proportional number of places and
  /// external files. Contents are deterministic: every 7th blob is
  /// unreferenced, every 11th fails its checksum and every 13th has no
  /// readable dimensions.
  pub fn seeded(records: usize) -> Self {
    let store = Self::new();
    {
      let mut tables = store.lock();
      for i in 0..records as u64 {
        let data = if i % 13 == 0 {
          format!("raw-{i}").into_bytes()
        } else {
          let (width, height) = (640 + (i % 5) as u16 * 160, 480 + (i % 3) as u16 * 120);
          let mut data = b"IMG".to_vec();
          data.extend_from_slice(&width.to_be_bytes());
          data.extend_from_slice(&height.to_be_bytes());
          data.extend_from_slice(format!("pixels-{i}").as_bytes());
          data
        };
        let mut checksum = checksum(&data);
        if i % 11 == 5 {
          checksum ^= 0xdead_beef;
        }
        tables.blobs.insert(
          i,
          Blob {
            id: i,
            data,
            checksum,
            referenced: i % 7 != 3,
            corrupt: false,
            placeholder: None,
          },
        );
      }

      for i in 0..(records / 10) as u64 {
        tables.places.insert(
          i,
          Place {
            id: i,
            name: format!("place-{i}"),
            coordinates: (i % 2 == 0).then_some((0.0, 0.0)),
          },
        );
        tables.files.insert(
          i,
          ExternalFile {
            id: i,
            file_name: format!("attachment-{i}.dat"),
            location: None,
          },
        );
      }
    }
    store
  }

  fn lock(&self) -> MutexGuard<'_, Tables> {
    self.tables.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn blob(&self, id: u64) -> Option<Blob> {
    self.lock().blobs.get(&id).cloned()
  }

  pub fn blob_ids(&self) -> Vec<u64> {
    self.lock().blobs.keys().copied().collect()
  }

  /// Recompute the checksum of blob `id`, flagging it corrupt on mismatch.
  /// Returns `None` if the blob no longer exists.
  pub fn verify_blob(&self, id: u64) -> Option<bool> {
    let mut tables = self.lock();
    let blob = tables.blobs.get_mut(&id)?;
    let valid = checksum(&blob.data) == blob.checksum;
    blob.corrupt = !valid;
    Some(valid)
  }

  pub fn set_placeholder(&self, id: u64, placeholder: Placeholder) -> bool {
    match self.lock().blobs.get_mut(&id) {
      Some(blob) => {
        blob.placeholder = Some(placeholder);
        true
      }
      None => false,
    }
  }

  pub fn orphan_ids(&self) -> Vec<u64> {
    self
      .lock()
      .blobs
      .values()
      .filter(|b| !b.referenced)
      .map(|b| b.id)
      .collect()
  }

  pub fn remove_blob(&self, id: u64) -> Option<Blob> {
    self.lock().blobs.remove(&id)
  }

  /// Drop corrupt blobs and release spare capacity. Returns the number of
  /// bytes reclaimed.
  pub fn compact(&self) -> usize {
    let mut tables = self.lock();
    let before: usize = tables.blobs.values().map(|b| b.data.capacity()).sum();
    tables.blobs.retain(|_, b| !b.corrupt);
    for blob in tables.blobs.values_mut() {
      blob.data.shrink_to_fit();
    }
    let after: usize = tables.blobs.values().map(|b| b.data.capacity()).sum();
    before - after
  }

  pub fn places_without_coordinates(&self) -> Vec<Place> {
    self
      .lock()
      .places
      .values()
      .filter(|p| p.coordinates.is_none())
      .cloned()
      .collect()
  }

  pub fn set_coordinates(&self, id: u64, coordinates: (f64, f64)) {
    if let Some(place) = self.lock().places.get_mut(&id) {
      place.coordinates = Some(coordinates);
    }
  }

  pub fn unlinked_files(&self) -> Vec<ExternalFile> {
    self
      .lock()
      .files
      .values()
      .filter(|f| f.location.is_none())
      .cloned()
      .collect()
  }

  pub fn set_location(&self, id: u64, location: PathBuf) {
    if let Some(file) = self.lock().files.get_mut(&id) {
      file.location = Some(location);
    }
  }

  /// Take a maintenance lease. Leases are returned with [`release_lease`](Self::release_lease).
  pub fn acquire_lease(&self) {
    self.leases.fetch_add(1, Ordering::AcqRel);
  }

  pub fn release_lease(&self) {
    self.leases.fetch_sub(1, Ordering::AcqRel);
  }
}

#[cfg(test)]
impl RecordStore {
  pub fn blob_count(&self) -> usize {
    self.lock().blobs.len()
  }

  pub fn corrupt_count(&self) -> usize {
    self.lock().blobs.values().filter(|b| b.corrupt).count()
  }

  pub fn active_leases(&self) -> usize {
    self.leases.load(Ordering::Acquire)
  }
}

/// FNV-1a over `data`.
pub fn checksum(data: &[u8]) -> u32 {
  data.iter().fold(0x811c_9dc5, |hash: u32, byte| {
    (hash ^ *byte as u32).wrapping_mul(0x0100_0193)
  })
}
