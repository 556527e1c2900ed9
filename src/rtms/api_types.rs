//! Serde-deserializable types matching the RTMS XML responses.
//!
//! Every item field is kept as an optional string; numeric conversion happens
//! per record in the filter so one bad field only costs that record.

use serde::Deserialize;

/// Result codes the portal uses for a successful query.
const SUCCESS_CODES: &[&str] = &["00", "000"];

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
  pub header: ApiHeader,
  #[serde(default)]
  pub body: ApiBody,
}

impl ApiResponse {
  pub fn is_success(&self) -> bool {
    SUCCESS_CODES.contains(&self.header.result_code.trim())
  }

  /// `totalCount` reported more items than the page carried, i.e. the
  /// month was cut off at `numOfRows`.
  pub fn is_truncated(&self) -> bool {
    field(&self.body.total_count)
      .and_then(|count| count.parse::<usize>().ok())
      .is_some_and(|total| total > self.body.items.item.len())
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiHeader {
  #[serde(rename = "resultCode")]
  pub result_code: String,
  #[serde(rename = "resultMsg", default)]
  pub result_msg: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiBody {
  #[serde(default)]
  pub items: ApiItems,
  #[serde(rename = "totalCount", default)]
  pub total_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiItems {
  #[serde(default)]
  pub item: Vec<ApiItem>,
}

// ============================================================================
// Transaction item - shared by the trade and rent endpoints
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ApiItem {
  #[serde(rename = "aptNm", default)]
  pub apt_name: Option<String>,
  #[serde(rename = "umdNm", default)]
  pub subdivision: Option<String>,
  #[serde(rename = "excluUseAr", default)]
  pub exclusive_area: Option<String>,
  #[serde(rename = "dealAmount", default)]
  pub deal_amount: Option<String>,
  #[serde(default)]
  pub deposit: Option<String>,
  #[serde(rename = "monthlyRent", default)]
  pub monthly_rent: Option<String>,
  #[serde(default)]
  pub floor: Option<String>,
  #[serde(rename = "dealYear", default)]
  pub deal_year: Option<String>,
  #[serde(rename = "dealMonth", default)]
  pub deal_month: Option<String>,
  #[serde(rename = "dealDay", default)]
  pub deal_day: Option<String>,
}

/// Trimmed field value, with empty strings treated as absent.
pub fn field(value: &Option<String>) -> Option<&str> {
  value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
