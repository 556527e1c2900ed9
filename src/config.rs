use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rtms::types::EntityKey;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub collect: CollectConfig,
  pub cache: CacheConfig,
  pub logging: LoggingConfig,
  /// Entities refreshed by `dealcache sync`
  pub watchlist: Vec<EntityKey>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Apartment sale endpoint
  pub trade_url: String,
  /// Apartment lease (jeonse / monthly rent) endpoint
  pub rent_url: String,
  /// `numOfRows` sent with every page request
  pub page_size: u32,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      trade_url: "http://apis.data.go.kr/1613000/RTMSDataSvcAptTrade/getRTMSDataSvcAptTrade"
        .to_string(),
      rent_url: "http://apis.data.go.kr/1613000/RTMSDataSvcAptRent/getRTMSDataSvcAptRent"
        .to_string(),
      page_size: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectConfig {
  /// Page requests in flight at once within a batch
  pub concurrency: usize,
  /// Per-attempt timeout in milliseconds
  pub timeout_ms: u64,
  /// Months per batch in a full scan
  pub batch_months: usize,
  /// Hard cap on how far back a full scan goes
  pub max_years: u32,
  /// Horizon start when an entity has no construction year
  pub default_build_year: i32,
  /// Trailing months re-fetched when a cache exists
  pub refresh_months: usize,
  /// Consecutive empty batches that end a full scan (0 = never)
  pub full_empty_batch_limit: u32,
  /// Consecutive empty batches that end a refresh (0 = never)
  pub refresh_empty_batch_limit: u32,
  /// Entities fetched at once by `sync`
  pub entity_concurrency: usize,
}

impl Default for CollectConfig {
  fn default() -> Self {
    Self {
      concurrency: 24,
      timeout_ms: 3000,
      batch_months: 24,
      max_years: 30,
      default_build_year: 1990,
      refresh_months: 3,
      full_empty_batch_limit: 2,
      refresh_empty_batch_limit: 1,
      entity_concurrency: 3,
    }
  }
}

impl CollectConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Disable to always scan the full history and never persist
  pub enabled: bool,
  /// Cache root (default: $XDG_DATA_HOME/dealcache/cache)
  pub dir: Option<PathBuf>,
  /// A partition refreshed more recently than this is served as-is
  pub fresh_for_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      dir: None,
      fresh_for_minutes: 0,
    }
  }
}

impl CacheConfig {
  pub fn resolved_dir(&self) -> Result<PathBuf> {
    match &self.dir {
      Some(dir) => Ok(dir.clone()),
      None => Ok(data_dir()?.join("cache")),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive when RUST_LOG is not set
  pub level: String,
  /// Also write a daily rolling log file under the data directory
  pub file: bool,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: true,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./dealcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/dealcache/config.yaml
  ///
  /// With no file anywhere the built-in defaults are used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("dealcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("dealcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get the RTMS service key from environment variables.
  ///
  /// Checks DEALCACHE_SERVICE_KEY first, then RTMS_SERVICE_KEY as fallback.
  /// The key is used exactly as issued by the portal (already percent-encoded).
  pub fn get_service_key() -> Result<String> {
    std::env::var("DEALCACHE_SERVICE_KEY")
      .or_else(|_| std::env::var("RTMS_SERVICE_KEY"))
      .map_err(|_| {
        eyre!("RTMS service key not found. Set DEALCACHE_SERVICE_KEY or RTMS_SERVICE_KEY environment variable.")
      })
  }
}

/// Per-user data directory for caches and logs.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("dealcache"))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::rtms::types::RecordKind;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.collect.concurrency, 24);
    assert_eq!(config.collect.refresh_months, 3);
    assert!(config.cache.enabled);
    assert!(config.watchlist.is_empty());
  }

  #[test]
  fn test_partial_sections_keep_other_defaults() {
    let yaml = r#"
collect:
  concurrency: 12
  full_empty_batch_limit: 4
cache:
  fresh_for_minutes: 30
watchlist:
  - name: Sample Towers
    area: 84
    region_code: "11110"
    subdivision: Sajik-dong
    kind: sale
    build_year: 2004
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.collect.concurrency, 12);
    assert_eq!(config.collect.full_empty_batch_limit, 4);
    assert_eq!(config.collect.batch_months, 24);
    assert_eq!(config.cache.fresh_for_minutes, 30);
    assert_eq!(config.api.page_size, 1000);
    assert_eq!(config.watchlist.len(), 1);
    assert_eq!(config.watchlist[0].kind(), RecordKind::Sale);
    assert_eq!(config.watchlist[0].build_year(), Some(2004));
  }

  #[test]
  fn test_invalid_watchlist_entry_is_rejected() {
    let yaml = r#"
watchlist:
  - name: ""
    area: 84
    region_code: "11110"
    subdivision: Sajik-dong
    kind: sale
"#;
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    let err = Config::load(Some(Path::new("/nonexistent/dealcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
