use color_eyre::{eyre::eyre, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{data_dir, LoggingConfig};

/// Install the global subscriber: stderr always, plus a daily rolling file
/// under the data directory when enabled.
///
/// Keep the returned guard alive for the life of the process, or buffered
/// file output is lost on exit.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
  let env_filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .boxed();

  let (file_layer, guard) = if config.file {
    let dir = data_dir()?.join("logs");
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    let appender = tracing_appender::rolling::daily(dir, "dealcache.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer().with_writer(writer).with_ansi(false).boxed();
    (Some(layer), Some(guard))
  } else {
    (None, None)
  };

  tracing_subscriber::registry()
    .with(env_filter)
    .with(stderr_layer)
    .with(file_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to install tracing subscriber: {}", e))?;

  Ok(guard)
}

/// A bare level applies to this crate only; anything else is taken as a
/// full filter directive.
fn default_directive(level: &str) -> String {
  let level = level.trim();
  if ["trace", "debug", "info", "warn", "error"].contains(&level.to_ascii_lowercase().as_str()) {
    format!("dealcache={}", level.to_ascii_lowercase())
  } else {
    level.to_string()
  }
}
