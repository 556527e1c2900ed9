//! Typed errors for the collection engine.
//!
//! Application plumbing (config, CLI, file I/O) uses `color_eyre::Result`;
//! these enums cover the cases callers are expected to match on.

use std::time::Duration;
use thiserror::Error;

/// Rejected Entity Key construction. The only hard failure a caller can hit.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum KeyError {
  #[error("entity name is empty")]
  MissingName,
  #[error("subdivision name is empty")]
  MissingSubdivision,
  #[error("region code must be five digits, got {0:?}")]
  InvalidRegion(String),
  #[error("area class must be a positive number, got {0}")]
  InvalidArea(f64),
}

/// Failure of a single page request. Never escapes a batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PageError {
  #[error("request timed out after {0:?}")]
  Timeout(Duration),
  #[error("transport error: {0}")]
  Transport(String),
  #[error("unexpected HTTP status {0}")]
  Status(u16),
  #[error("malformed page: {0}")]
  Malformed(String),
}

impl PageError {
  /// Whether a second attempt has a chance of succeeding.
  pub fn is_transient(&self) -> bool {
    match self {
      PageError::Timeout(_) | PageError::Transport(_) => true,
      PageError::Status(code) => *code == 429 || *code >= 500,
      PageError::Malformed(_) => false,
    }
  }
}
