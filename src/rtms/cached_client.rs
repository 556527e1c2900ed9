//! Cached RTMS client: the caller-facing `fetch` / `clear` surface.

use chrono::{Local, NaiveDate};
use color_eyre::Result;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheLayer, CacheResult, ClearScope, FileStore, NoopStore, PartitionStore};
use crate::collect::{CancelToken, CollectSettings, Collector, PageSource};
use crate::config::Config;
use crate::event::{ProgressEvent, ProgressSink};

use super::client::RtmsClient;
use super::types::{EntityKey, RecordSet};

/// How a fetch treats an existing partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
  /// Refresh the trailing window on a hit, scan everything on a miss
  Incremental,
  /// Ignore the cache and rescan the full history, then overwrite it
  Rebuild,
}

/// Transaction source with transparent per-entity caching.
///
/// This wraps a [`PageSource`] and a partition store; callers only ever see
/// finished, deduplicated record sets.
pub struct CachedRtmsClient<P: PageSource + ?Sized> {
  inner: Arc<P>,
  cache: CacheLayer<dyn PartitionStore>,
  settings: CollectSettings,
  entity_concurrency: usize,
  events: ProgressSink,
  today: Option<NaiveDate>,
}

impl CachedRtmsClient<RtmsClient> {
  /// Create a client for the live API with the configured store.
  pub fn new(config: &Config, events: ProgressSink) -> Result<Self> {
    let inner = Arc::new(RtmsClient::new(config)?);
    let storage: Arc<dyn PartitionStore> = if config.cache.enabled {
      Arc::new(FileStore::open(config.cache.resolved_dir()?)?)
    } else {
      Arc::new(NoopStore)
    };

    Ok(Self::with_parts(inner, storage, config, events))
  }
}

impl<P: PageSource + ?Sized> CachedRtmsClient<P> {
  pub fn with_parts(
    inner: Arc<P>,
    storage: Arc<dyn PartitionStore>,
    config: &Config,
    events: ProgressSink,
  ) -> Self {
    let cache = CacheLayer::new(storage)
      .with_stale_time(chrono::Duration::minutes(config.cache.fresh_for_minutes.max(0)));

    Self {
      inner,
      cache,
      settings: CollectSettings::from_config(config),
      entity_concurrency: config.collect.entity_concurrency.max(1),
      events,
      today: None,
    }
  }

  /// Pin the calendar date used for planning and date validation.
  pub fn with_today(mut self, today: NaiveDate) -> Self {
    self.today = Some(today);
    self
  }

  fn today(&self) -> NaiveDate {
    self.today.unwrap_or_else(|| Local::now().date_naive())
  }

  /// Full transaction history for one entity.
  ///
  /// Never fails: page and cache problems degrade to fewer records, and an
  /// empty set means no transactions were found.
  pub async fn fetch(
    &self,
    key: &EntityKey,
    mode: FetchMode,
    cancel: &CancelToken,
  ) -> CacheResult<RecordSet> {
    let today = self.today();
    let cutoff = self.settings.plan.refresh_cutoff(today);
    let collector = Collector::new(&*self.inner, &self.settings, &self.events);

    let result = self
      .cache
      .fetch_incremental(key, mode == FetchMode::Rebuild, cutoff, |plan_mode| {
        collector.collect(key, plan_mode, today, cancel)
      })
      .await;

    if result.data.is_empty() {
      info!(entity = %key, source = ?result.source, "no transactions");
    } else {
      info!(entity = %key, source = ?result.source, records = result.data.len(), "fetch finished");
    }
    self.events.emit(ProgressEvent::Finished {
      entity: key.to_string(),
      records: result.data.len(),
    });

    result
  }

  /// Fetch several entities, at most `entity_concurrency` at once.
  /// Results come back in input order.
  pub async fn fetch_many(
    &self,
    keys: &[EntityKey],
    mode: FetchMode,
    cancel: &CancelToken,
  ) -> Vec<(EntityKey, CacheResult<RecordSet>)> {
    stream::iter(keys)
      .map(|key| async move { (key.clone(), self.fetch(key, mode, cancel).await) })
      .buffered(self.entity_concurrency)
      .collect()
      .await
  }

  /// Remove one or all cached partitions.
  pub fn clear(&self, scope: ClearScope<'_>) -> Result<usize> {
    self.cache.clear(scope)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::error::PageError;
  use crate::event::channel;
  use crate::rtms::filter::tests::{page_xml, ItemXml};
  use crate::rtms::types::{PageRequest, RecordDetail, RecordKind, TransactionRecord, YearMonth};
  use async_trait::async_trait;
  use chrono::{Duration as ChronoDuration, Utc};
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex;
  use std::time::{Duration, Instant};
  use tempfile::TempDir;

  /// In-memory RTMS: every month answers with the sales registered for it.
  #[derive(Default)]
  struct FakeRtms {
    pages: Mutex<HashMap<YearMonth, Vec<ItemXml>>>,
    failing: AtomicBool,
    delay: Duration,
    calls: AtomicUsize,
  }

  impl FakeRtms {
    fn with_delay(delay: Duration) -> Self {
      Self {
        delay,
        ..Self::default()
      }
    }

    fn sale(&self, name: &str, date: NaiveDate, price: u64) {
      self
        .pages
        .lock()
        .unwrap()
        .entry(YearMonth::from_date(date))
        .or_default()
        .push(ItemXml::sale(name, 84.0, date, price, 5));
    }

    fn calls(&self) -> usize {
      self.calls.load(Ordering::SeqCst)
    }
  }

  #[async_trait]
  impl PageSource for FakeRtms {
    async fn fetch_page(&self, request: &PageRequest) -> Result<String, PageError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if !self.delay.is_zero() {
        tokio::time::sleep(self.delay).await;
      }
      if self.failing.load(Ordering::SeqCst) {
        return Err(PageError::Status(503));
      }
      let pages = self.pages.lock().unwrap();
      let items = pages.get(&request.month).map(Vec::as_slice).unwrap_or(&[]);
      Ok(page_xml(items))
    }
  }

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn today() -> NaiveDate {
    date(2024, 3, 15)
  }

  fn key(name: &str) -> EntityKey {
    EntityKey::new(name, 84.0, "11110", "Sajik-dong", RecordKind::Sale).unwrap()
  }

  fn record(date: NaiveDate, price: u64) -> TransactionRecord {
    TransactionRecord {
      date,
      price,
      floor: 5,
      area: 84.0,
      detail: RecordDetail::Sale,
    }
  }

  fn client(
    source: &Arc<FakeRtms>,
    store: &Arc<FileStore>,
    config: &Config,
    events: ProgressSink,
  ) -> CachedRtmsClient<FakeRtms> {
    let storage: Arc<dyn PartitionStore> = store.clone();
    CachedRtmsClient::with_parts(source.clone(), storage, config, events).with_today(today())
  }

  fn setup() -> (TempDir, Arc<FakeRtms>, Arc<FileStore>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    (dir, Arc::new(FakeRtms::default()), store)
  }

  /// Two sales in January, none in February, five in March 2024.
  fn seed_recent(source: &FakeRtms, name: &str) {
    source.sale(name, date(2024, 1, 10), 82000);
    source.sale(name, date(2024, 1, 20), 82500);
    for day in 1..=5 {
      source.sale(name, date(2024, 3, day), 83000 + day as u64 * 100);
    }
  }

  #[tokio::test]
  async fn test_first_fetch_scans_and_persists() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let started = Utc::now();

    let result = client
      .fetch(&key("Sample Towers"), FetchMode::Incremental, &CancelToken::new())
      .await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.len(), 7);
    assert!(result.data.windows(2).all(|w| w[0].date <= w[1].date));
    assert_eq!(result.data[0].date, date(2024, 1, 10));

    let stored = store.load(&key("Sample Towers")).unwrap().unwrap();
    assert_eq!(stored.records, result.data);
    assert!(stored.refreshed_at >= started);
  }

  #[tokio::test]
  async fn test_scan_stops_after_consecutive_empty_batches() {
    let (_dir, source, store) = setup();
    source.sale("Sample Towers", date(2023, 6, 1), 80000);
    // Three batches further back, past the empty-batch limit
    source.sale("Sample Towers", date(2017, 6, 1), 50000);
    let (sink, mut stream) = channel();
    let client = client(&source, &store, &Config::default(), sink);

    let result = client
      .fetch(&key("Sample Towers"), FetchMode::Incremental, &CancelToken::new())
      .await;

    assert_eq!(result.data.len(), 1);
    assert_eq!(result.data[0].price, 80000);

    let events = stream.drain();
    let completed = events
      .iter()
      .filter(|e| matches!(e, ProgressEvent::BatchCompleted { .. }))
      .count();
    // The batch holding June 2023 plus two empty ones
    assert_eq!(completed, 3);
    assert!(events
      .iter()
      .any(|e| matches!(e, ProgressEvent::TerminationReached { consecutive_empty: 2, .. })));
    assert!(matches!(events.last(), Some(ProgressEvent::Finished { records: 1, .. })));
    assert_eq!(source.calls(), 3 * 24);
  }

  #[tokio::test]
  async fn test_repeated_fetch_is_idempotent() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let cancel = CancelToken::new();

    let first = client.fetch(&key("Sample Towers"), FetchMode::Incremental, &cancel).await;
    let calls_after_scan = source.calls();
    let second = client.fetch(&key("Sample Towers"), FetchMode::Incremental, &cancel).await;

    assert_eq!(first.data, second.data);
    assert_eq!(second.source, CacheSource::Network);
    // The second call only re-reads the trailing window
    assert_eq!(source.calls() - calls_after_scan, 3);
  }

  #[tokio::test]
  async fn test_fresh_partition_is_served_without_network() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let mut config = Config::default();
    config.cache.fresh_for_minutes = 60;
    let client = client(&source, &store, &config, ProgressSink::disabled());
    let cancel = CancelToken::new();

    client.fetch(&key("Sample Towers"), FetchMode::Incremental, &cancel).await;
    let calls = source.calls();
    let cached = client.fetch(&key("Sample Towers"), FetchMode::Incremental, &cancel).await;

    assert_eq!(cached.source, CacheSource::CacheFresh);
    assert_eq!(cached.data.len(), 7);
    assert!(cached.cached_at.is_some());
    assert_eq!(source.calls(), calls);
  }

  #[tokio::test]
  async fn test_refresh_replaces_window_and_keeps_history() {
    let (_dir, source, store) = setup();
    let key = key("Sample Towers");

    let mut cached: Vec<TransactionRecord> = (0..48)
      .map(|i| record(date(2023, 1, 1) + ChronoDuration::days(i), 80000 + i as u64))
      .collect();
    cached.push(record(date(2024, 1, 1), 90000));
    cached.push(record(date(2024, 1, 1), 90100));
    store
      .save(&key, &cached, Utc::now() - ChronoDuration::days(1))
      .unwrap();

    source.sale("Sample Towers", date(2024, 1, 1), 90000);
    source.sale("Sample Towers", date(2024, 2, 10), 91000);
    source.sale("Sample Towers", date(2024, 3, 5), 92000);
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());

    let result = client.fetch(&key, FetchMode::Incremental, &CancelToken::new()).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.len(), 51);
    assert_eq!(result.data.iter().filter(|r| r.price == 90000).count(), 1);
    assert!(!result.data.iter().any(|r| r.price == 90100));
    assert_eq!(source.calls(), 3);
    assert_eq!(store.load(&key).unwrap().unwrap().records, result.data);
  }

  #[tokio::test]
  async fn test_failed_refresh_serves_cache_unchanged() {
    let (_dir, source, store) = setup();
    let key = key("Sample Towers");
    let cached = vec![record(date(2023, 5, 2), 79000), record(date(2023, 8, 9), 80500)];
    store
      .save(&key, &cached, Utc::now() - ChronoDuration::days(1))
      .unwrap();
    let before = store.load(&key).unwrap().unwrap();

    source.failing.store(true, Ordering::SeqCst);
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let result = client.fetch(&key, FetchMode::Incremental, &CancelToken::new()).await;

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, cached);
    assert_eq!(result.cached_at, Some(before.refreshed_at));
    assert_eq!(store.load(&key).unwrap().unwrap(), before);
  }

  #[tokio::test]
  async fn test_corrupt_partition_falls_back_to_full_scan() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let key = key("Sample Towers");
    let path = store.partition_path(&key);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, "{ not json").unwrap();

    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let result = client.fetch(&key, FetchMode::Incremental, &CancelToken::new()).await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data.len(), 7);
    assert_eq!(store.load(&key).unwrap().unwrap().records.len(), 7);
  }

  #[tokio::test]
  async fn test_rebuild_ignores_cached_records() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let key = key("Sample Towers");
    store
      .save(&key, &[record(date(2019, 4, 4), 60000)], Utc::now() - ChronoDuration::days(1))
      .unwrap();

    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let result = client.fetch(&key, FetchMode::Rebuild, &CancelToken::new()).await;

    assert_eq!(result.data.len(), 7);
    assert!(!result.data.iter().any(|r| r.price == 60000));
  }

  #[tokio::test]
  async fn test_cancel_returns_promptly_without_saving() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let source = Arc::new(FakeRtms::with_delay(Duration::from_secs(2)));
    seed_recent(&source, "Sample Towers");
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      trigger.cancel();
    });

    let started = Instant::now();
    let result = client.fetch(&key("Sample Towers"), FetchMode::Incremental, &cancel).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(result.source, CacheSource::Partial);
    assert!(result.data.is_empty());
    assert!(store.load(&key("Sample Towers")).unwrap().is_none());
  }

  #[tokio::test]
  async fn test_cancelled_refresh_leaves_partition_untouched() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path()).unwrap());
    let source = Arc::new(FakeRtms::with_delay(Duration::from_secs(2)));
    seed_recent(&source, "Sample Towers");
    let key = key("Sample Towers");
    let cached = vec![record(date(2023, 5, 2), 79000), record(date(2024, 1, 3), 81500)];
    store
      .save(&key, &cached, Utc::now() - ChronoDuration::days(1))
      .unwrap();
    let before = store.load(&key).unwrap().unwrap();
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      trigger.cancel();
    });

    let started = Instant::now();
    let result = client.fetch(&key, FetchMode::Incremental, &cancel).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(result.source, CacheSource::Partial);
    assert_eq!(result.data, cached);
    assert_eq!(result.cached_at, Some(before.refreshed_at));
    assert_eq!(store.load(&key).unwrap().unwrap(), before);
  }

  #[tokio::test]
  async fn test_no_transactions_is_an_empty_success() {
    let (_dir, source, store) = setup();
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());

    let result = client
      .fetch(&key("Nowhere Heights"), FetchMode::Incremental, &CancelToken::new())
      .await;

    assert_eq!(result.source, CacheSource::Network);
    assert!(result.data.is_empty());
  }

  #[tokio::test]
  async fn test_fetch_many_keeps_input_order() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    source.sale("River Court", date(2024, 2, 14), 70000);
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let keys = vec![key("River Court"), key("Sample Towers")];

    let results = client
      .fetch_many(&keys, FetchMode::Incremental, &CancelToken::new())
      .await;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, keys[0]);
    assert_eq!(results[0].1.data.len(), 1);
    assert_eq!(results[1].0, keys[1]);
    assert_eq!(results[1].1.data.len(), 7);
  }

  #[tokio::test]
  async fn test_fetch_many_with_repeated_key() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let keys = vec![key("Sample Towers"), key("Sample Towers")];

    let results = client
      .fetch_many(&keys, FetchMode::Incremental, &CancelToken::new())
      .await;

    for (_, result) in &results {
      assert_eq!(result.source, CacheSource::Network);
      assert_eq!(result.data.len(), 7);
    }
    assert_eq!(store.load(&keys[0]).unwrap().unwrap().records.len(), 7);
  }

  #[tokio::test]
  async fn test_clear_removes_partition() {
    let (_dir, source, store) = setup();
    seed_recent(&source, "Sample Towers");
    let client = client(&source, &store, &Config::default(), ProgressSink::disabled());
    let key = key("Sample Towers");
    client.fetch(&key, FetchMode::Incremental, &CancelToken::new()).await;

    assert_eq!(client.clear(ClearScope::One(&key)).unwrap(), 1);
    assert!(store.load(&key).unwrap().is_none());
  }
}
