//! Collection engine: plans month pages for an entity, fetches them batch by
//! batch under a concurrency cap, filters the payloads and decides when to
//! stop going further back in time.
//!
//! Batches run strictly one after another, newest first. The only suspension
//! point is the page request inside the fetcher.

mod cancel;
mod fetcher;
mod monitor;
mod planner;

pub use cancel::CancelToken;
pub use fetcher::{BatchFetcher, BatchOutcome, PageSource, RetryPolicy};
pub use monitor::{EmptyBatchMonitor, Verdict};
pub use planner::{plan, PlanMode, PlanSettings};

use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::{ProgressEvent, ProgressSink};
use crate::rtms::filter::RecordFilter;
use crate::rtms::types::{EntityKey, TransactionRecord, YearMonth};

/// Tunables for one collector, derived from configuration.
#[derive(Debug, Clone)]
pub struct CollectSettings {
  pub plan: PlanSettings,
  pub concurrency: usize,
  pub retry: RetryPolicy,
  pub full_empty_batch_limit: u32,
  pub refresh_empty_batch_limit: u32,
}

impl CollectSettings {
  pub fn from_config(config: &Config) -> Self {
    Self {
      plan: PlanSettings::from_config(&config.collect, &config.api),
      concurrency: config.collect.concurrency,
      retry: RetryPolicy::new(config.collect.timeout()),
      full_empty_batch_limit: config.collect.full_empty_batch_limit,
      refresh_empty_batch_limit: config.collect.refresh_empty_batch_limit,
    }
  }

  fn empty_batch_limit(&self, mode: PlanMode) -> u32 {
    match mode {
      PlanMode::Full => self.full_empty_batch_limit,
      PlanMode::Refresh => self.refresh_empty_batch_limit,
    }
  }
}

/// What one top-level collection produced.
#[derive(Debug, Default)]
pub struct Collection {
  /// Matching records from every completed batch, unsorted
  pub records: Vec<TransactionRecord>,
  /// Months whose page still failed after the retry
  pub failed_months: BTreeSet<YearMonth>,
  /// Pages that resolved, successfully or not
  pub pages: usize,
  /// Batches that completed
  pub batches: usize,
  /// The empty-batch limit cut the scan short
  pub terminated_early: bool,
  /// The token fired; `records` holds only completed batches
  pub cancelled: bool,
}

impl Collection {
  /// Every page that was asked for failed, so nothing was learned.
  pub fn is_offline(&self) -> bool {
    self.pages > 0 && self.failed_months.len() == self.pages
  }
}

/// Runs the plan → fetch → filter → monitor loop for one entity.
pub struct Collector<'a, S: PageSource + ?Sized> {
  source: &'a S,
  settings: &'a CollectSettings,
  events: &'a ProgressSink,
}

impl<'a, S: PageSource + ?Sized> Collector<'a, S> {
  pub fn new(source: &'a S, settings: &'a CollectSettings, events: &'a ProgressSink) -> Self {
    Self {
      source,
      settings,
      events,
    }
  }

  pub async fn collect(
    &self,
    key: &EntityKey,
    mode: PlanMode,
    today: NaiveDate,
    cancel: &CancelToken,
  ) -> Collection {
    let entity = key.to_string();
    let filter = RecordFilter::for_key(key, today);
    let fetcher = BatchFetcher::new(self.source, self.settings.concurrency, self.settings.retry);
    let mut monitor = EmptyBatchMonitor::new(self.settings.empty_batch_limit(mode));
    let mut collection = Collection::default();

    for batch in plan(key, mode, today, &self.settings.plan) {
      if cancel.is_cancelled() {
        collection.cancelled = true;
        break;
      }
      let (Some(newest), Some(oldest)) = (batch.newest(), batch.oldest()) else {
        continue;
      };
      self.events.emit(ProgressEvent::BatchStarted {
        entity: entity.clone(),
        batch: batch.index,
        newest,
        oldest,
      });

      let pages = match fetcher.fetch_batch(&batch, cancel).await {
        BatchOutcome::Completed(pages) => pages,
        BatchOutcome::Cancelled => {
          collection.cancelled = true;
          break;
        }
      };

      let mut batch_records = Vec::new();
      let mut failed_pages = 0;
      for page in pages {
        collection.pages += 1;
        let parsed = page.result.and_then(|body| filter.parse_page(&body));
        match parsed {
          Ok(records) => batch_records.extend(records),
          Err(error) => {
            warn!(entity = %entity, month = %page.month, %error, "page counted as empty");
            failed_pages += 1;
            collection.failed_months.insert(page.month);
            self.events.emit(ProgressEvent::PageFailed {
              entity: entity.clone(),
              month: page.month,
              error: error.to_string(),
            });
          }
        }
      }

      debug!(
        entity = %entity,
        batch = batch.index,
        %newest,
        %oldest,
        records = batch_records.len(),
        failed_pages,
        "batch completed"
      );
      self.events.emit(ProgressEvent::BatchCompleted {
        entity: entity.clone(),
        batch: batch.index,
        records: batch_records.len(),
        failed_pages,
      });
      collection.batches += 1;

      let had_records = !batch_records.is_empty();
      collection.records.extend(batch_records);

      if monitor.observe(had_records) == Verdict::Stop {
        info!(
          entity = %entity,
          consecutive_empty = monitor.consecutive_empty(),
          oldest = %oldest,
          "no older transactions expected, stopping scan"
        );
        self.events.emit(ProgressEvent::TerminationReached {
          entity: entity.clone(),
          consecutive_empty: monitor.consecutive_empty(),
        });
        collection.terminated_early = true;
        break;
      }
    }

    if collection.cancelled {
      info!(entity = %entity, batches = collection.batches, "collection cancelled");
      self.events.emit(ProgressEvent::Cancelled { entity });
    }

    collection
  }
}
