//! Page planner: which months to ask for, in what groups.

use chrono::NaiveDate;

use crate::config::{ApiConfig, CollectConfig};
use crate::rtms::types::{EntityKey, PageRequest, YearMonth};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
  /// Whole history from the current month back to the horizon
  Full,
  /// Only the trailing refresh window
  Refresh,
}

#[derive(Debug, Clone)]
pub struct PlanSettings {
  pub batch_months: usize,
  pub max_years: u32,
  pub default_build_year: i32,
  pub refresh_months: usize,
  pub page_size: u32,
}

impl PlanSettings {
  pub fn from_config(collect: &CollectConfig, api: &ApiConfig) -> Self {
    Self {
      batch_months: collect.batch_months,
      max_years: collect.max_years,
      default_build_year: collect.default_build_year,
      refresh_months: collect.refresh_months,
      page_size: api.page_size,
    }
  }

  /// First day of the oldest month in the refresh window. Cached records
  /// strictly before it are kept as-is by a refresh.
  pub fn refresh_cutoff(&self, today: NaiveDate) -> NaiveDate {
    let months = self.refresh_months.max(1) as u32;
    YearMonth::from_date(today).back(months - 1).first_day()
  }
}

/// Page requests dispatched together. Months run newest to oldest.
#[derive(Debug, Clone)]
pub struct Batch {
  pub index: usize,
  pub requests: Vec<PageRequest>,
}

impl Batch {
  pub fn newest(&self) -> Option<YearMonth> {
    self.requests.first().map(|r| r.month)
  }

  pub fn oldest(&self) -> Option<YearMonth> {
    self.requests.last().map(|r| r.month)
  }
}

/// Plan the batches for one entity. Pure; the caller stops consuming the
/// result when the early-termination monitor says so.
pub fn plan(key: &EntityKey, mode: PlanMode, today: NaiveDate, settings: &PlanSettings) -> Vec<Batch> {
  let current = YearMonth::from_date(today);

  let months: Vec<YearMonth> = match mode {
    PlanMode::Full => {
      let horizon = horizon_start(key, current, settings);
      std::iter::successors(Some(current), |m| Some(m.pred()))
        .take_while(|m| *m >= horizon)
        .collect()
    }
    PlanMode::Refresh => std::iter::successors(Some(current), |m| Some(m.pred()))
      .take(settings.refresh_months.max(1))
      .collect(),
  };

  let batch_len = match mode {
    PlanMode::Full => settings.batch_months.max(1),
    PlanMode::Refresh => months.len().max(1),
  };

  months
    .chunks(batch_len)
    .enumerate()
    .map(|(index, chunk)| Batch {
      index,
      requests: chunk
        .iter()
        .map(|month| PageRequest {
          region_code: key.region_code().to_string(),
          month: *month,
          page_size: settings.page_size,
          kind: key.kind(),
        })
        .collect(),
    })
    .collect()
}

/// Oldest month a full scan may reach: January of the construction year,
/// but never more than `max_years` back.
fn horizon_start(key: &EntityKey, current: YearMonth, settings: &PlanSettings) -> YearMonth {
  let build_year = key.build_year().unwrap_or(settings.default_build_year);
  let by_build_year = YearMonth::new(build_year, 1).unwrap_or(current);
  let by_cap = current.back(settings.max_years.max(1) * 12 - 1);
  by_build_year.max(by_cap).min(current)
}
