use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use url::Url;

use crate::collect::PageSource;
use crate::config::Config;
use crate::error::PageError;

use super::types::PageRequest;

/// Only connection setup is bounded here; each attempt as a whole is bounded
/// by the fetcher's retry policy.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// RTMS open API client
#[derive(Clone)]
pub struct RtmsClient {
  http: reqwest::Client,
  service_key: String,
  trade_url: Url,
  rent_url: Url,
}

impl RtmsClient {
  pub fn new(config: &Config) -> Result<Self> {
    let service_key = Config::get_service_key()?;
    Self::with_key(config, service_key)
  }

  pub fn with_key(config: &Config, service_key: String) -> Result<Self> {
    let trade_url = Url::parse(&config.api.trade_url)
      .map_err(|e| eyre!("Invalid trade endpoint {}: {}", config.api.trade_url, e))?;
    let rent_url = Url::parse(&config.api.rent_url)
      .map_err(|e| eyre!("Invalid rent endpoint {}: {}", config.api.rent_url, e))?;

    let http = reqwest::Client::builder()
      .pool_max_idle_per_host(config.collect.concurrency.max(1) * 2)
      .connect_timeout(CONNECT_TIMEOUT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      service_key,
      trade_url,
      rent_url,
    })
  }

  /// Full query URL for one page.
  ///
  /// The service key is appended verbatim: the portal issues it already
  /// percent-encoded and rejects it when encoded twice.
  pub fn page_url(&self, request: &PageRequest) -> Url {
    let mut url = if request.kind.is_lease() {
      self.rent_url.clone()
    } else {
      self.trade_url.clone()
    };
    let query = format!(
      "serviceKey={}&LAWD_CD={}&DEAL_YMD={}&numOfRows={}&pageNo=1",
      self.service_key,
      request.region_code,
      request.month.token(),
      request.page_size
    );
    url.set_query(Some(&query));
    url
  }
}

#[async_trait]
impl PageSource for RtmsClient {
  async fn fetch_page(&self, request: &PageRequest) -> Result<String, PageError> {
    let response = self
      .http
      .get(self.page_url(request))
      .send()
      .await
      .map_err(classify)?;

    let status = response.status();
    if !status.is_success() {
      return Err(PageError::Status(status.as_u16()));
    }

    response.text().await.map_err(classify)
  }
}

fn classify(e: reqwest::Error) -> PageError {
  if e.is_timeout() {
    PageError::Timeout(CONNECT_TIMEOUT)
  } else if let Some(status) = e.status() {
    PageError::Status(status.as_u16())
  } else {
    PageError::Transport(e.to_string())
  }
}
