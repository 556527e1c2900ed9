use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::KeyError;

/// Sale vs. lease classification of a transaction.
///
/// Lease partitions hold pure deposit (jeonse) deals unless the caller asks
/// for hybrid deposit+monthly-rent deals too, which is a separate partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
  Sale,
  Lease,
  #[serde(rename = "lease_rent")]
  LeaseWithRent,
}

impl RecordKind {
  pub fn as_str(self) -> &'static str {
    match self {
      RecordKind::Sale => "sale",
      RecordKind::Lease => "lease",
      RecordKind::LeaseWithRent => "lease_rent",
    }
  }

  pub fn is_lease(self) -> bool {
    !matches!(self, RecordKind::Sale)
  }
}

/// Identifies one cache partition. Fields are private so every key in the
/// program went through [`EntityKey::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEntityKey")]
pub struct EntityKey {
  name: String,
  area: f64,
  region_code: String,
  subdivision: String,
  kind: RecordKind,
  /// Construction year, used as the history horizon. Not part of the
  /// partition identity.
  #[serde(skip_serializing_if = "Option::is_none")]
  build_year: Option<i32>,
}

/// Unvalidated shape of an [`EntityKey`] as it appears in config files.
#[derive(Debug, Deserialize)]
struct RawEntityKey {
  name: String,
  area: f64,
  region_code: String,
  subdivision: String,
  kind: RecordKind,
  #[serde(default)]
  build_year: Option<i32>,
}

impl TryFrom<RawEntityKey> for EntityKey {
  type Error = KeyError;

  fn try_from(raw: RawEntityKey) -> Result<Self, Self::Error> {
    EntityKey::new(raw.name, raw.area, raw.region_code, raw.subdivision, raw.kind)
      .map(|key| key.with_build_year(raw.build_year))
  }
}

impl EntityKey {
  pub fn new(
    name: impl Into<String>,
    area: f64,
    region_code: impl Into<String>,
    subdivision: impl Into<String>,
    kind: RecordKind,
  ) -> Result<Self, KeyError> {
    let name = normalize_ws(&name.into());
    let subdivision = normalize_ws(&subdivision.into());
    let region_code = region_code.into().trim().to_string();

    if name.is_empty() {
      return Err(KeyError::MissingName);
    }
    if subdivision.is_empty() {
      return Err(KeyError::MissingSubdivision);
    }
    if region_code.len() != 5 || !region_code.chars().all(|c| c.is_ascii_digit()) {
      return Err(KeyError::InvalidRegion(region_code));
    }
    if !area.is_finite() || area <= 0.0 {
      return Err(KeyError::InvalidArea(area));
    }

    Ok(Self {
      name,
      area,
      region_code,
      subdivision,
      kind,
      build_year: None,
    })
  }

  pub fn with_build_year(mut self, build_year: Option<i32>) -> Self {
    self.build_year = build_year;
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn area(&self) -> f64 {
    self.area
  }

  pub fn region_code(&self) -> &str {
    &self.region_code
  }

  pub fn subdivision(&self) -> &str {
    &self.subdivision
  }

  pub fn kind(&self) -> RecordKind {
    self.kind
  }

  pub fn build_year(&self) -> Option<i32> {
    self.build_year
  }
}

impl fmt::Display for EntityKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} {}㎡ ({} {}, {})",
      self.name,
      self.area,
      self.region_code,
      self.subdivision,
      self.kind.as_str()
    )
  }
}

/// Sub-kind of a lease deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeaseKind {
  /// Pure deposit lease (jeonse)
  Jeonse,
  /// Deposit plus a monthly rent, in units of 10,000 KRW
  MonthlyRent { rent: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordDetail {
  Sale,
  Lease { sub_kind: LeaseKind },
}

/// One matched transaction. `price` is the deal amount (sale) or deposit
/// (lease) in units of 10,000 KRW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
  pub date: NaiveDate,
  pub price: u64,
  pub floor: i32,
  pub area: f64,
  #[serde(flatten)]
  pub detail: RecordDetail,
}

/// Composite identity used for deduplication.
pub type DedupKey = (NaiveDate, u64, i32);

impl TransactionRecord {
  pub fn dedup_key(&self) -> DedupKey {
    (self.date, self.price, self.floor)
  }
}

pub type RecordSet = Vec<TransactionRecord>;

/// A calendar month, the unit the remote source is queried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
  year: i32,
  month: u32,
}

impl YearMonth {
  pub fn new(year: i32, month: u32) -> Option<Self> {
    (1..=12).contains(&month).then_some(Self { year, month })
  }

  pub fn from_date(date: NaiveDate) -> Self {
    Self {
      year: date.year(),
      month: date.month(),
    }
  }

  pub fn year(self) -> i32 {
    self.year
  }

  pub fn month(self) -> u32 {
    self.month
  }

  /// The month before this one.
  pub fn pred(self) -> Self {
    if self.month == 1 {
      Self {
        year: self.year - 1,
        month: 12,
      }
    } else {
      Self {
        year: self.year,
        month: self.month - 1,
      }
    }
  }

  /// Step back `months` months.
  pub fn back(self, months: u32) -> Self {
    let index = self.year * 12 + self.month as i32 - 1 - months as i32;
    Self {
      year: index.div_euclid(12),
      month: index.rem_euclid(12) as u32 + 1,
    }
  }

  pub fn first_day(self) -> NaiveDate {
    NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
  }

  /// `YYYYMM`, the form the remote source expects.
  pub fn token(self) -> String {
    format!("{:04}{:02}", self.year, self.month)
  }
}

impl fmt::Display for YearMonth {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:04}-{:02}", self.year, self.month)
  }
}

/// One remote query: a single region and calendar month.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub region_code: String,
  pub month: YearMonth,
  pub page_size: u32,
  pub kind: RecordKind,
}

/// Collapse runs of whitespace and trim, so names compare the same however
/// the source pads them.
pub fn normalize_ws(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_requires_all_parts() {
    assert_eq!(
      EntityKey::new(" ", 84.0, "11110", "Sajik-dong", RecordKind::Sale),
      Err(KeyError::MissingName)
    );
    assert_eq!(
      EntityKey::new("Sample Towers", 84.0, "11110", "", RecordKind::Sale),
      Err(KeyError::MissingSubdivision)
    );
    assert_eq!(
      EntityKey::new("Sample Towers", 84.0, "1111", "Sajik-dong", RecordKind::Sale),
      Err(KeyError::InvalidRegion("1111".into()))
    );
    assert!(matches!(
      EntityKey::new("Sample Towers", 0.0, "11110", "Sajik-dong", RecordKind::Sale),
      Err(KeyError::InvalidArea(_))
    ));
  }

  #[test]
  fn test_key_normalizes_whitespace() {
    let key = EntityKey::new("  Sample   Towers ", 84.0, " 11110", "Sajik-dong ", RecordKind::Lease)
      .unwrap();
    assert_eq!(key.name(), "Sample Towers");
    assert_eq!(key.region_code(), "11110");
    assert_eq!(key.subdivision(), "Sajik-dong");
  }

  #[test]
  fn test_key_deserialize_validates() {
    let yaml = "name: Sample Towers\narea: 84\nregion_code: '11110'\nsubdivision: Sajik-dong\nkind: lease_rent\nbuild_year: 2004\n";
    let key: EntityKey = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(key.kind(), RecordKind::LeaseWithRent);
    assert_eq!(key.build_year(), Some(2004));

    let bad = "name: Sample Towers\narea: 84\nregion_code: 'abc'\nsubdivision: Sajik-dong\nkind: sale\n";
    assert!(serde_yaml::from_str::<EntityKey>(bad).is_err());
  }

  #[test]
  fn test_kind_serde_name_matches_file_name() {
    for kind in [RecordKind::Sale, RecordKind::Lease, RecordKind::LeaseWithRent] {
      assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
      let back: RecordKind = serde_json::from_value(serde_json::json!(kind.as_str())).unwrap();
      assert_eq!(back, kind);
    }
  }

  #[test]
  fn test_year_month_stepping() {
    let jan = YearMonth::new(2024, 1).unwrap();
    assert_eq!(jan.pred(), YearMonth::new(2023, 12).unwrap());
    assert_eq!(jan.back(13), YearMonth::new(2022, 12).unwrap());
    assert_eq!(jan.back(0), jan);
    assert_eq!(jan.token(), "202401");
    assert_eq!(jan.to_string(), "2024-01");
    assert!(YearMonth::new(2024, 13).is_none());
  }

  #[test]
  fn test_record_serializes_tagged_detail() {
    let record = TransactionRecord {
      date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
      price: 45000,
      floor: 7,
      area: 84.97,
      detail: RecordDetail::Lease {
        sub_kind: LeaseKind::MonthlyRent { rent: 50 },
      },
    };
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["kind"], "lease");
    assert_eq!(json["sub_kind"]["type"], "monthly_rent");
    assert_eq!(json["sub_kind"]["rent"], 50);

    let back: TransactionRecord = serde_json::from_value(json).unwrap();
    assert_eq!(back, record);
  }
}
