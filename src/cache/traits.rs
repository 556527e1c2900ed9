//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

use crate::rtms::types::{EntityKey, RecordKind, RecordSet, TransactionRecord};

/// Persisted document for one Entity Key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPartition {
  pub entity_name: String,
  pub area: f64,
  pub region_code: String,
  pub subdivision: String,
  pub record_kind: RecordKind,
  /// When the partition was last written
  pub refreshed_at: DateTime<Utc>,
  /// Deduplicated, ascending by date
  pub records: RecordSet,
}

impl CachedPartition {
  pub fn new(key: &EntityKey, records: &[TransactionRecord], refreshed_at: DateTime<Utc>) -> Self {
    Self {
      entity_name: key.name().to_string(),
      area: key.area(),
      region_code: key.region_code().to_string(),
      subdivision: key.subdivision().to_string(),
      record_kind: key.kind(),
      refreshed_at,
      records: records.to_vec(),
    }
  }

  /// Whether this document was written for `key`.
  pub fn belongs_to(&self, key: &EntityKey) -> bool {
    self.entity_name == key.name()
      && self.area == key.area()
      && self.region_code == key.region_code()
      && self.subdivision == key.subdivision()
      && self.record_kind == key.kind()
  }
}

/// Which partitions a clear removes.
#[derive(Debug, Clone, Copy)]
pub enum ClearScope<'a> {
  One(&'a EntityKey),
  All,
}

/// Trait for partition storage backends.
pub trait PartitionStore: Send + Sync {
  /// Stored partition for `key`, or `None` on a miss.
  fn load(&self, key: &EntityKey) -> Result<Option<CachedPartition>>;

  /// Replace the partition for `key`.
  fn save(&self, key: &EntityKey, records: &[TransactionRecord], refreshed_at: DateTime<Utc>) -> Result<()>;

  /// Remove partitions; returns how many were removed.
  fn clear(&self, scope: ClearScope<'_>) -> Result<usize>;
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at,
    }
  }

  /// Create a best-effort result for a cancelled fetch. Nothing was saved.
  pub fn partial(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Partial,
      cached_at,
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh data from network, merged and saved
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Offline mode - network unavailable, serving cached data
  Offline,
  /// Cancelled mid-fetch - best-effort data, cache untouched
  Partial,
}
