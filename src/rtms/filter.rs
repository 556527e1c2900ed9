//! Page parser and record filter.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::error::PageError;

use super::api_types::{field, ApiItem, ApiResponse};
use super::types::{
  normalize_ws, EntityKey, LeaseKind, RecordDetail, RecordKind, TransactionRecord,
};

/// Maximum distance between an item's exclusive-use area and the requested
/// area class. Inclusive.
pub const AREA_TOLERANCE: f64 = 1.0;

/// Absorbs float noise so a difference of exactly one unit always passes.
const AREA_EPSILON: f64 = 1e-9;

/// Why an item did not become a record.
#[derive(Debug, PartialEq)]
enum Rejection {
  /// Belongs to another entity, area, sub-kind or is out of range
  Mismatch,
  /// Matched the entity but a field could not be parsed
  Malformed(&'static str),
}

/// Extracts the records of one entity from page payloads.
#[derive(Debug, Clone)]
pub struct RecordFilter {
  name: String,
  subdivision: String,
  target_area: f64,
  kind: RecordKind,
  today: NaiveDate,
}

impl RecordFilter {
  pub fn for_key(key: &EntityKey, today: NaiveDate) -> Self {
    Self {
      name: normalize_ws(key.name()),
      subdivision: normalize_ws(key.subdivision()),
      target_area: key.area(),
      kind: key.kind(),
      today,
    }
  }

  /// Parse a page payload and keep the matching records.
  ///
  /// Only an unreadable payload or an API-level error code fails the page;
  /// bad individual items are dropped.
  pub fn parse_page(&self, body: &str) -> Result<Vec<TransactionRecord>, PageError> {
    let response: ApiResponse =
      quick_xml::de::from_str(body).map_err(|e| PageError::Malformed(e.to_string()))?;

    if !response.is_success() {
      return Err(PageError::Malformed(format!(
        "result code {} ({})",
        response.header.result_code.trim(),
        response.header.result_msg.trim()
      )));
    }
    if response.is_truncated() {
      warn!(
        entity = %self.name,
        total = field(&response.body.total_count).unwrap_or_default(),
        returned = response.body.items.item.len(),
        "page truncated, raise api.page_size"
      );
    }

    let records = response
      .body
      .items
      .item
      .iter()
      .filter_map(|item| match self.accept(item) {
        Ok(record) => Some(record),
        Err(Rejection::Mismatch) => None,
        Err(Rejection::Malformed(what)) => {
          debug!(field = what, entity = %self.name, "dropping malformed record");
          None
        }
      })
      .collect();

    Ok(records)
  }

  fn accept(&self, item: &ApiItem) -> Result<TransactionRecord, Rejection> {
    let name = field(&item.apt_name).map(normalize_ws);
    if name.as_deref() != Some(self.name.as_str()) {
      return Err(Rejection::Mismatch);
    }
    let subdivision = field(&item.subdivision).map(normalize_ws);
    if subdivision.as_deref() != Some(self.subdivision.as_str()) {
      return Err(Rejection::Mismatch);
    }

    let area: f64 = field(&item.exclusive_area)
      .and_then(|s| s.parse().ok())
      .ok_or(Rejection::Malformed("excluUseAr"))?;
    if (area - self.target_area).abs() > AREA_TOLERANCE + AREA_EPSILON {
      return Err(Rejection::Mismatch);
    }

    let (price, detail) = match self.kind {
      RecordKind::Sale => {
        let price = parse_amount(field(&item.deal_amount)).ok_or(Rejection::Malformed("dealAmount"))?;
        (price, RecordDetail::Sale)
      }
      RecordKind::Lease | RecordKind::LeaseWithRent => {
        // An absent rent column means a pure deposit lease.
        let rent = match field(&item.monthly_rent) {
          None => 0,
          Some(raw) => parse_amount(Some(raw)).ok_or(Rejection::Malformed("monthlyRent"))?,
        };
        if rent > 0 && self.kind == RecordKind::Lease {
          return Err(Rejection::Mismatch);
        }
        let deposit = parse_amount(field(&item.deposit)).ok_or(Rejection::Malformed("deposit"))?;
        let sub_kind = if rent > 0 {
          LeaseKind::MonthlyRent { rent }
        } else {
          LeaseKind::Jeonse
        };
        (deposit, RecordDetail::Lease { sub_kind })
      }
    };
    if price == 0 {
      return Err(Rejection::Mismatch);
    }

    let floor = match field(&item.floor) {
      None => 0,
      Some(raw) => raw.parse().map_err(|_| Rejection::Malformed("floor"))?,
    };

    let date = self.deal_date(item)?;
    if date > self.today {
      return Err(Rejection::Mismatch);
    }

    Ok(TransactionRecord {
      date,
      price,
      floor,
      area,
      detail,
    })
  }

  fn deal_date(&self, item: &ApiItem) -> Result<NaiveDate, Rejection> {
    let year: i32 = field(&item.deal_year)
      .and_then(|s| s.parse().ok())
      .ok_or(Rejection::Malformed("dealYear"))?;
    let month: u32 = field(&item.deal_month)
      .and_then(|s| s.parse().ok())
      .ok_or(Rejection::Malformed("dealMonth"))?;
    let day: u32 = match field(&item.deal_day) {
      None => 1,
      Some(raw) => raw.parse().map_err(|_| Rejection::Malformed("dealDay"))?,
    };
    NaiveDate::from_ymd_opt(year, month, day).ok_or(Rejection::Malformed("deal date"))
  }
}

/// Parse a comma-grouped amount such as `" 82,500"`.
fn parse_amount(raw: Option<&str>) -> Option<u64> {
  raw?.replace(',', "").trim().parse().ok()
}
