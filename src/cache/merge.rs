use std::collections::BTreeMap;

use crate::rtms::types::{DedupKey, RecordSet, TransactionRecord};

/// Combine retained cache records with freshly fetched ones.
///
/// Records are deduplicated by (date, price, floor), a fresh record replacing
/// a retained one with the same key. Output is ascending by date, ties broken
/// by price then floor, so equal inputs always give equal output.
pub fn merge_records(
  retained: impl IntoIterator<Item = TransactionRecord>,
  fresh: impl IntoIterator<Item = TransactionRecord>,
) -> RecordSet {
  let mut by_key: BTreeMap<DedupKey, TransactionRecord> = BTreeMap::new();
  for record in retained.into_iter().chain(fresh) {
    by_key.insert(record.dedup_key(), record);
  }
  by_key.into_values().collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rtms::types::{LeaseKind, RecordDetail};
  use chrono::NaiveDate;

  fn record(y: i32, m: u32, d: u32, price: u64, floor: i32) -> TransactionRecord {
    TransactionRecord {
      date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
      price,
      floor,
      area: 84.5,
      detail: RecordDetail::Sale,
    }
  }

  #[test]
  fn test_merge_count_subtracts_shared_keys() {
    let cached = vec![
      record(2023, 5, 1, 80000, 3),
      record(2023, 7, 9, 81000, 5),
      record(2023, 12, 2, 82000, 7),
      record(2024, 1, 1, 83000, 9),
    ];
    let fetched = vec![
      record(2024, 2, 3, 84000, 2),
      record(2023, 12, 2, 82000, 7),
      record(2024, 1, 1, 83000, 9),
    ];

    let merged = merge_records(cached.clone(), fetched.clone());

    assert_eq!(merged.len(), cached.len() + fetched.len() - 2);
    assert!(merged.windows(2).all(|w| w[0].date <= w[1].date));
  }

  #[test]
  fn test_same_day_records_with_different_price_or_floor_are_kept() {
    let merged = merge_records(
      vec![record(2024, 1, 1, 83000, 9)],
      vec![record(2024, 1, 1, 83000, 10), record(2024, 1, 1, 82000, 9)],
    );
    assert_eq!(merged.len(), 3);
  }

  #[test]
  fn test_fresh_copy_wins() {
    let mut fresh = record(2024, 1, 1, 50000, 4);
    fresh.detail = RecordDetail::Lease {
      sub_kind: LeaseKind::Jeonse,
    };
    fresh.area = 84.97;
    let merged = merge_records(vec![record(2024, 1, 1, 50000, 4)], vec![fresh.clone()]);
    assert_eq!(merged, vec![fresh]);
  }

  #[test]
  fn test_merge_is_idempotent() {
    let cached = vec![record(2023, 3, 1, 1, 1), record(2021, 1, 1, 2, 2)];
    let fetched = vec![record(2023, 3, 1, 1, 1), record(2024, 1, 1, 3, 3)];

    let once = merge_records(cached.clone(), fetched.clone());
    let twice = merge_records(once.clone(), fetched);
    assert_eq!(once, twice);
    assert_eq!(merge_records(once.clone(), Vec::new()), once);
  }

  #[test]
  fn test_unsorted_input_comes_out_sorted() {
    let merged = merge_records(
      vec![record(2024, 3, 1, 1, 1), record(2020, 1, 1, 1, 1)],
      vec![record(2022, 6, 1, 1, 1)],
    );
    let years: Vec<_> = merged.iter().map(|r| r.date.format("%Y").to_string()).collect();
    assert_eq!(years, vec!["2020", "2022", "2024"]);
  }
}
