//! Per-entity transaction cache.
//!
//! This module keeps one partition per Entity Key and:
//! - Loads partitions fail-open (unreadable cache is a miss)
//! - Refreshes only a trailing window when a partition exists
//! - Merges and deduplicates refreshed records deterministically
//! - Serves the stored partition when the network is unavailable

mod layer;
mod merge;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{FileStore, NoopStore};
pub use traits::{CacheResult, CacheSource, ClearScope, PartitionStore};
