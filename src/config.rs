use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use janitor_catalog::{Capability, Environment};
use serde::{Deserialize, Serialize};

/// Name of the configuration file looked up in the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// Janitor configuration, read from JSON. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JanitorConfig {
  pub pipeline: PipelineConfig,
  pub progress: ProgressConfig,
  pub placeholder: PlaceholderConfig,
  /// Directory external files are relinked against.
  pub file_root: Option<PathBuf>,
  pub geocoding: Option<GeocodingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub queue_capacity: usize,
  pub concurrency: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      queue_capacity: 64,
      concurrency: janitor_pipeline::DEFAULT_CONCURRENCY,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
  pub max_updates_per_second: u32,
}

impl Default for ProgressConfig {
  fn default() -> Self {
    Self {
      max_updates_per_second: janitor_engine::DEFAULT_MAX_PROGRESS_UPDATES_PER_SECOND,
    }
  }
}

/// Dimensions used for placeholders of blobs whose size cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaceholderConfig {
  pub fallback_width: u32,
  pub fallback_height: u32,
}

impl Default for PlaceholderConfig {
  fn default() -> Self {
    Self {
      fallback_width: 320,
      fallback_height: 240,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingConfig {
  pub api_key: String,
}

impl JanitorConfig {
  /// Load configuration from `path`.
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Self = serde_json::from_str(&content)
      .with_context(|| format!("failed to parse config file: {}", path.display()))?;
    config
      .validate()
      .with_context(|| format!("invalid config file: {}", path.display()))?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    anyhow::ensure!(
      self.pipeline.queue_capacity > 0,
      "pipeline.queue_capacity must be at least 1"
    );
    Ok(())
  }

  /// Load `explicit` if given, else `<data_dir>/config.json` if it exists,
  /// else defaults.
  pub fn discover(explicit: Option<&Path>, data_dir: &Path) -> Result<Self> {
    if let Some(path) = explicit {
      return Self::load(path);
    }

    let path = data_dir.join(CONFIG_FILE);
    if path.is_file() {
      Self::load(&path)
    } else {
      Ok(Self::default())
    }
  }

  /// Capabilities this configuration makes available.
  pub fn environment(&self) -> Environment {
    let mut environment = Environment::new();
    if self.file_root.is_some() {
      environment.grant(Capability::EXTERNAL_FILE_ROOT);
    }
    if self.geocoding.is_some() {
      environment.grant(Capability::NETWORK_GEOCODING);
    }
    environment
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = JanitorConfig::default();
    assert_eq!(config.pipeline.queue_capacity, 64);
    assert_eq!(config.pipeline.concurrency, 4);
    assert_eq!(config.progress.max_updates_per_second, 60);
    assert_eq!(config.placeholder.fallback_width, 320);
    assert_eq!(config.placeholder.fallback_height, 240);
    assert_eq!(config.environment().capabilities().count(), 0);
  }

  #[test]
  fn test_partial_file_keeps_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
      file,
      r#"{{ "pipeline": {{ "concurrency": 8 }}, "geocoding": {{ "api_key": "k" }} }}"#
    )
    .unwrap();

    let config = JanitorConfig::load(file.path()).unwrap();
    assert_eq!(config.pipeline.concurrency, 8);
    assert_eq!(config.pipeline.queue_capacity, 64);
    assert!(config.environment().has(&Capability::NETWORK_GEOCODING));
    assert!(!config.environment().has(&Capability::EXTERNAL_FILE_ROOT));
  }

  #[test]
  fn test_discover_in_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    assert_eq!(JanitorConfig::discover(None, dir.path()).unwrap(), JanitorConfig::default());

    std::fs::write(dir.path().join(CONFIG_FILE), r#"{ "file_root": "/srv/files" }"#).unwrap();
    let config = JanitorConfig::discover(None, dir.path()).unwrap();
    assert_eq!(config.file_root, Some(PathBuf::from("/srv/files")));
  }

  #[test]
  fn test_malformed_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{ not json").unwrap();

    let err = JanitorConfig::discover(Some(&path), dir.path()).unwrap_err();
    assert!(err.to_string().contains("failed to parse config file"));
  }

  #[test]
  fn test_zero_queue_capacity_is_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE);
    std::fs::write(&path, r#"{ "pipeline": { "queue_capacity": 0 } }"#).unwrap();

    let err = JanitorConfig::load(&path).unwrap_err();
    assert!(err.to_string().contains("invalid config file"));
    assert!(format!("{err:#}").contains("queue_capacity must be at least 1"));
  }
}
