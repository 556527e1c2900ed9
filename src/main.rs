mod cache;
mod collect;
mod config;
mod error;
mod event;
mod logging;
mod rtms;

use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::cache::{CacheSource, ClearScope, FileStore, PartitionStore};
use crate::collect::CancelToken;
use crate::event::{ProgressEvent, ProgressStream};
use crate::rtms::types::{EntityKey, RecordKind, RecordSet};
use crate::rtms::{CachedRtmsClient, FetchMode};

#[derive(Parser, Debug)]
#[command(name = "dealcache")]
#[command(about = "Collects and caches apartment transaction history from the RTMS open API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dealcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch one entity's transaction history and print it as JSON
  Fetch {
    #[command(flatten)]
    entity: EntityArgs,

    /// Ignore the cached partition and rescan the full history
    #[arg(long)]
    rebuild: bool,
  },
  /// Refresh every entity in the configured watchlist
  Sync {
    /// Ignore cached partitions and rescan the full history
    #[arg(long)]
    rebuild: bool,
  },
  /// Remove cached partitions
  Clear(ClearArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum KindArg {
  Sale,
  Lease,
}

#[derive(ClapArgs, Debug)]
struct EntityArgs {
  /// Apartment complex name as registered with RTMS
  #[arg(long)]
  name: String,

  /// Exclusive-use area in square meters
  #[arg(long)]
  area: f64,

  /// Five-digit legal-district region code (LAWD_CD)
  #[arg(long)]
  region: String,

  /// Neighborhood (dong) name
  #[arg(long)]
  subdivision: String,

  #[arg(long, value_enum, default_value_t = KindArg::Sale)]
  kind: KindArg,

  /// Include lease deals with a monthly rent component
  #[arg(long)]
  with_monthly_rent: bool,

  /// Construction year; bounds how far back a full scan goes
  #[arg(long)]
  build_year: Option<i32>,
}

impl EntityArgs {
  fn to_key(&self) -> Result<EntityKey> {
    let kind = record_kind(self.kind, self.with_monthly_rent);
    let key = EntityKey::new(&self.name, self.area, &self.region, &self.subdivision, kind)?;
    Ok(key.with_build_year(self.build_year))
  }
}

#[derive(ClapArgs, Debug)]
struct ClearArgs {
  /// Remove every cached partition
  #[arg(long, conflicts_with_all = ["name", "area", "region", "subdivision"])]
  all: bool,

  #[arg(long, required_unless_present = "all")]
  name: Option<String>,

  #[arg(long, required_unless_present = "all")]
  area: Option<f64>,

  #[arg(long, required_unless_present = "all")]
  region: Option<String>,

  #[arg(long, required_unless_present = "all")]
  subdivision: Option<String>,

  #[arg(long, value_enum, default_value_t = KindArg::Sale)]
  kind: KindArg,

  #[arg(long)]
  with_monthly_rent: bool,
}

fn record_kind(kind: KindArg, with_monthly_rent: bool) -> RecordKind {
  match (kind, with_monthly_rent) {
    (KindArg::Sale, _) => RecordKind::Sale,
    (KindArg::Lease, false) => RecordKind::Lease,
    (KindArg::Lease, true) => RecordKind::LeaseWithRent,
  }
}

/// JSON document printed by `fetch`.
#[derive(Serialize)]
struct FetchOutput<'a> {
  entity: &'a EntityKey,
  source: CacheSource,
  cached_at: Option<DateTime<Utc>>,
  records: &'a RecordSet,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  match args.command {
    Command::Fetch { entity, rebuild } => {
      let key = entity.to_key()?;
      let (sink, stream) = event::channel();
      let progress = tokio::spawn(log_progress(stream));
      let cancel = cancel_on_ctrl_c();

      let client = CachedRtmsClient::new(&config, sink)?;
      let result = client.fetch(&key, fetch_mode(rebuild), &cancel).await;
      drop(client);
      let _ = progress.await;

      if result.source == CacheSource::Partial {
        warn!(entity = %key, "fetch cancelled, output is incomplete and was not cached");
      }
      let output = FetchOutput {
        entity: &key,
        source: result.source,
        cached_at: result.cached_at,
        records: &result.data,
      };
      println!("{}", serde_json::to_string_pretty(&output)?);
    }
    Command::Sync { rebuild } => {
      if config.watchlist.is_empty() {
        return Err(eyre!("Watchlist is empty. Add entities under `watchlist:` in the config file."));
      }
      let (sink, stream) = event::channel();
      let progress = tokio::spawn(log_progress(stream));
      let cancel = cancel_on_ctrl_c();

      let client = CachedRtmsClient::new(&config, sink)?;
      let results = client
        .fetch_many(&config.watchlist, fetch_mode(rebuild), &cancel)
        .await;
      drop(client);
      let _ = progress.await;

      for (key, result) in &results {
        println!("{}\t{:?}\t{} records", key, result.source, result.data.len());
      }
    }
    Command::Clear(clear) => {
      // Clearing needs no service key, so go to the store directly
      let store = FileStore::open(config.cache.resolved_dir()?)?;
      let removed = if clear.all {
        store.clear(ClearScope::All)?
      } else {
        let key = clear_key(&clear)?;
        store.clear(ClearScope::One(&key))?
      };
      info!(dir = %store.root().display(), removed, "cache cleared");
      println!("Removed {} partition(s)", removed);
    }
  }

  Ok(())
}

fn fetch_mode(rebuild: bool) -> FetchMode {
  if rebuild {
    FetchMode::Rebuild
  } else {
    FetchMode::Incremental
  }
}

fn clear_key(args: &ClearArgs) -> Result<EntityKey> {
  let (Some(name), Some(area), Some(region), Some(subdivision)) =
    (&args.name, args.area, &args.region, &args.subdivision)
  else {
    return Err(eyre!("Either --all or --name, --area, --region and --subdivision are required"));
  };
  let kind = record_kind(args.kind, args.with_monthly_rent);
  Ok(EntityKey::new(name, area, region, subdivision, kind)?)
}

/// Token that fires on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
  let cancel = CancelToken::new();
  let trigger = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupted, cancelling");
      trigger.cancel();
    }
  });
  cancel
}

async fn log_progress(mut stream: ProgressStream) {
  while let Some(event) = stream.next().await {
    match event {
      ProgressEvent::BatchStarted {
        entity,
        batch,
        newest,
        oldest,
      } => debug!(%entity, batch, %newest, %oldest, "batch started"),
      ProgressEvent::BatchCompleted {
        entity,
        batch,
        records,
        failed_pages,
      } => info!(%entity, batch, records, failed_pages, "batch completed"),
      ProgressEvent::PageFailed { entity, month, error } => {
        debug!(%entity, %month, %error, "page failed")
      }
      ProgressEvent::TerminationReached {
        entity,
        consecutive_empty,
      } => debug!(%entity, consecutive_empty, "early termination"),
      ProgressEvent::Cancelled { entity } => warn!(%entity, "cancelled"),
      ProgressEvent::Finished { entity, records } => info!(%entity, records, "finished"),
    }
  }
}
