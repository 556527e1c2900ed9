//! Cache layer that orchestrates caching logic with network collection.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::merge::merge_records;
use super::traits::{CacheResult, CachedPartition, ClearScope, PartitionStore};
use crate::collect::{Collection, PlanMode};
use crate::rtms::types::{EntityKey, RecordSet, YearMonth};

/// Cache layer that manages partitions around a collection run.
///
/// This layer sits between the caller and the collector: it decides between
/// a full scan and a refresh, merges the outcome into the stored partition and
/// falls back to cached data when the network is unavailable.
pub struct CacheLayer<S: PartitionStore + ?Sized> {
  storage: Arc<S>,
  /// How long after a refresh a partition is served without the network
  stale_time: Duration,
}

impl<S: PartitionStore + ?Sized> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      stale_time: Duration::zero(),
    }
  }

  /// Set the stale time for cached data.
  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = stale_time;
    self
  }

  /// Check if cached data is stale based on its refresh timestamp.
  fn is_stale(&self, refreshed_at: DateTime<Utc>) -> bool {
    Utc::now() - refreshed_at >= self.stale_time
  }

  /// Load a partition, treating any storage failure as a miss.
  fn load_or_miss(&self, key: &EntityKey) -> Option<CachedPartition> {
    match self.storage.load(key) {
      Ok(partition) => partition,
      Err(e) => {
        warn!(entity = %key, error = %e, "cache unreadable, treating as miss");
        None
      }
    }
  }

  fn save(&self, key: &EntityKey, records: &RecordSet) {
    if let Err(e) = self.storage.save(key, records, Utc::now()) {
      error!(entity = %key, error = %e, "failed to save partition");
    }
  }

  /// Fetch with incremental update support.
  ///
  /// 1. On a hit, fresh partitions are returned as-is
  /// 2. Stale partitions are refreshed: records before `refresh_cutoff` are
  ///    kept, the window is replaced by what the collector found
  /// 3. On a miss (or `rebuild`), the collector scans the full history
  /// 4. A refresh where every page failed serves the cache (offline mode)
  /// 5. A cancelled collection is returned best-effort and never saved
  ///
  /// The collector receives the plan mode to run.
  pub async fn fetch_incremental<F, Fut>(
    &self,
    key: &EntityKey,
    rebuild: bool,
    refresh_cutoff: NaiveDate,
    collector: F,
  ) -> CacheResult<RecordSet>
  where
    F: FnOnce(PlanMode) -> Fut,
    Fut: Future<Output = Collection>,
  {
    let cached = if rebuild { None } else { self.load_or_miss(key) };

    let Some(cached) = cached else {
      // No cache, must scan the whole history
      let collection = collector(PlanMode::Full).await;
      let (cancelled, offline) = (collection.cancelled, collection.is_offline());
      let merged = merge_records(Vec::new(), collection.records);

      if cancelled {
        return CacheResult::partial(merged, None);
      }
      if offline {
        warn!(entity = %key, "every page failed, nothing cached");
        return CacheResult::offline(merged, None);
      }

      self.save(key, &merged);
      return CacheResult::from_network(merged);
    };

    if !self.is_stale(cached.refreshed_at) {
      debug!(entity = %key, refreshed_at = %cached.refreshed_at, "serving fresh partition");
      return CacheResult::from_cache(cached.records, cached.refreshed_at);
    }

    // Cache is stale, refresh the trailing window
    let collection = collector(PlanMode::Refresh).await;

    if collection.cancelled {
      return CacheResult::partial(cached.records, Some(cached.refreshed_at));
    }
    if collection.is_offline() {
      info!(entity = %key, "refresh failed entirely, serving cached partition");
      return CacheResult::offline(cached.records, Some(cached.refreshed_at));
    }

    // Months that could not be re-read keep what the cache knew about them.
    let retained = cached.records.into_iter().filter(|record| {
      record.date < refresh_cutoff
        || collection
          .failed_months
          .contains(&YearMonth::from_date(record.date))
    });
    let merged = merge_records(retained, collection.records);

    self.save(key, &merged);
    CacheResult::from_network(merged)
  }

  /// Remove one or all partitions.
  pub fn clear(&self, scope: ClearScope<'_>) -> Result<usize> {
    self.storage.clear(scope)
  }
}
