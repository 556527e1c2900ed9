//! Apartment transaction data from the RTMS open API.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod filter;
pub mod types;

pub use cached_client::{CachedRtmsClient, FetchMode};
