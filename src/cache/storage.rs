//! Partition storage backends: JSON files on disk, and a no-op store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::traits::{CachedPartition, ClearScope, PartitionStore};
use crate::rtms::types::{EntityKey, TransactionRecord};

/// Distinguishes temp files of concurrent saves to the same partition.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStore;

impl PartitionStore for NoopStore {
  fn load(&self, _key: &EntityKey) -> Result<Option<CachedPartition>> {
    Ok(None) // Always miss
  }

  fn save(&self, _key: &EntityKey, _records: &[TransactionRecord], _refreshed_at: DateTime<Utc>) -> Result<()> {
    Ok(()) // Discard
  }

  fn clear(&self, _scope: ClearScope<'_>) -> Result<usize> {
    Ok(0)
  }
}

/// One JSON document per Entity Key, grouped in a directory per
/// (region, subdivision):
///
/// ```text
/// <root>/11110_Sajik-dong/Sample_Towers-1a2b3c4d_84_sale.json
/// ```
pub struct FileStore {
  root: PathBuf,
}

impl FileStore {
  /// Open a store rooted at `root`, creating the directory if needed.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    std::fs::create_dir_all(&root)
      .map_err(|e| eyre!("Failed to create cache directory {}: {}", root.display(), e))?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Directory holding every partition of one (region, subdivision).
  pub fn partition_dir(&self, key: &EntityKey) -> PathBuf {
    self
      .root
      .join(format!("{}_{}", key.region_code(), slug(key.subdivision())))
  }

  /// File holding the partition for `key`.
  pub fn partition_path(&self, key: &EntityKey) -> PathBuf {
    self.partition_dir(key).join(format!(
      "{}-{}_{}_{}.json",
      slug(key.name()),
      short_hash(key.name()),
      key.area(),
      key.kind().as_str()
    ))
  }

  /// Remove every partition document (and leftover temp file) under the
  /// root. Only `<region>_<subdivision>` directories are visited; anything
  /// else in the root is left alone.
  fn clear_all(&self) -> Result<usize> {
    let entries = match std::fs::read_dir(&self.root) {
      Ok(entries) => entries,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
      Err(e) => return Err(eyre!("Failed to read cache directory {}: {}", self.root.display(), e)),
    };

    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
      let dir = entry.path();
      if !dir.is_dir() || !is_partition_dir(&entry.file_name().to_string_lossy()) {
        continue;
      }
      let files = std::fs::read_dir(&dir)
        .map_err(|e| eyre!("Failed to read partition directory {}: {}", dir.display(), e))?;
      for file in files.filter_map(|file| file.ok()) {
        let path = file.path();
        let name = file.file_name().to_string_lossy().into_owned();
        if !path.is_file() {
          continue;
        }
        if name.ends_with(".json") {
          std::fs::remove_file(&path)
            .map_err(|e| eyre!("Failed to remove partition {}: {}", path.display(), e))?;
          removed += 1;
        } else if name.contains(".json.") && name.ends_with(".tmp") {
          let _ = std::fs::remove_file(&path);
        }
      }
      // Stays while anything foreign is left inside.
      let _ = std::fs::remove_dir(&dir);
    }
    Ok(removed)
  }
}

/// `<five digits>_<slug>`, the shape of [`FileStore::partition_dir`] names.
fn is_partition_dir(name: &str) -> bool {
  match name.split_once('_') {
    Some((region, rest)) => {
      region.len() == 5 && region.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty()
    }
    None => false,
  }
}

impl PartitionStore for FileStore {
  fn load(&self, key: &EntityKey) -> Result<Option<CachedPartition>> {
    let path = self.partition_path(key);
    let bytes = match std::fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(eyre!("Failed to read partition {}: {}", path.display(), e)),
    };

    let partition: CachedPartition = serde_json::from_slice(&bytes)
      .map_err(|e| eyre!("Failed to decode partition {}: {}", path.display(), e))?;

    // Slugs can collide; the document carries the full identity.
    if !partition.belongs_to(key) {
      warn!(path = %path.display(), entity = %key, "partition belongs to another entity");
      return Ok(None);
    }

    Ok(Some(partition))
  }

  fn save(&self, key: &EntityKey, records: &[TransactionRecord], refreshed_at: DateTime<Utc>) -> Result<()> {
    let dir = self.partition_dir(key);
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create partition directory {}: {}", dir.display(), e))?;

    let path = self.partition_path(key);
    let partition = CachedPartition::new(key, records, refreshed_at);
    let data = serde_json::to_vec_pretty(&partition)
      .map_err(|e| eyre!("Failed to serialize partition: {}", e))?;

    // Write then rename so a crash never leaves a half-written partition.
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("json.{}-{}.tmp", std::process::id(), seq));
    std::fs::write(&tmp, data).map_err(|e| eyre!("Failed to write {}: {}", tmp.display(), e))?;
    std::fs::rename(&tmp, &path)
      .map_err(|e| eyre!("Failed to replace partition {}: {}", path.display(), e))?;

    debug!(path = %path.display(), records = records.len(), "partition saved");
    Ok(())
  }

  fn clear(&self, scope: ClearScope<'_>) -> Result<usize> {
    match scope {
      ClearScope::One(key) => {
        let path = self.partition_path(key);
        match std::fs::remove_file(&path) {
          Ok(()) => {
            // Drop the (region, subdivision) directory once it is empty.
            let _ = std::fs::remove_dir(self.partition_dir(key));
            Ok(1)
          }
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
          Err(e) => Err(eyre!("Failed to remove partition {}: {}", path.display(), e)),
        }
      }
      ClearScope::All => self.clear_all(),
    }
  }
}

/// File-system-safe rendition of a name. Letters of any script are kept.
fn slug(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    if c.is_alphanumeric() || c == '-' {
      out.push(c);
    } else if !out.ends_with('_') {
      out.push('_');
    }
  }
  let trimmed = out.trim_matches('_');
  if trimmed.is_empty() {
    "_".to_string()
  } else {
    trimmed.to_string()
  }
}

/// First eight hex digits of SHA-256, to keep distinct names apart after
/// slugging.
fn short_hash(s: &str) -> String {
  let digest = Sha256::digest(s.as_bytes());
  hex::encode(&digest[..4])
}
