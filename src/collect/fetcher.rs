//! Bounded concurrent fetcher for one batch of page requests.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::PageError;
use crate::rtms::types::{PageRequest, YearMonth};

use super::cancel::CancelToken;
use super::planner::Batch;

/// Anything that can answer a single month query with a raw payload.
#[async_trait]
pub trait PageSource: Send + Sync {
  async fn fetch_page(&self, request: &PageRequest) -> Result<String, PageError>;
}

/// Uniform timeout/retry policy applied to every page request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Total attempts, including the first
  pub max_attempts: u32,
  /// Limit for each attempt
  pub timeout: Duration,
}

impl RetryPolicy {
  /// One retry after the initial attempt.
  pub fn new(timeout: Duration) -> Self {
    Self {
      max_attempts: 2,
      timeout,
    }
  }
}

/// Resolution of one page within a batch.
#[derive(Debug)]
pub struct PageOutcome {
  pub month: YearMonth,
  pub result: Result<String, PageError>,
}

#[derive(Debug)]
pub enum BatchOutcome {
  /// Every page resolved; order is completion order
  Completed(Vec<PageOutcome>),
  /// The token fired first; partial results were dropped
  Cancelled,
}

pub struct BatchFetcher<'a, S: PageSource + ?Sized> {
  source: &'a S,
  concurrency: usize,
  policy: RetryPolicy,
}

impl<'a, S: PageSource + ?Sized> BatchFetcher<'a, S> {
  pub fn new(source: &'a S, concurrency: usize, policy: RetryPolicy) -> Self {
    Self {
      source,
      concurrency: concurrency.max(1),
      policy,
    }
  }

  /// Fetch every page of `batch` with at most `concurrency` in flight.
  pub async fn fetch_batch(&self, batch: &Batch, cancel: &CancelToken) -> BatchOutcome {
    if cancel.is_cancelled() {
      return BatchOutcome::Cancelled;
    }

    let pages = stream::iter(batch.requests.iter())
      .map(|request| async move {
        PageOutcome {
          month: request.month,
          result: self.fetch_with_retry(request).await,
        }
      })
      .buffer_unordered(self.concurrency)
      .collect::<Vec<_>>();

    tokio::select! {
      biased;
      _ = cancel.cancelled() => BatchOutcome::Cancelled,
      pages = pages => BatchOutcome::Completed(pages),
    }
  }

  async fn fetch_with_retry(&self, request: &PageRequest) -> Result<String, PageError> {
    let mut attempt = 1;
    loop {
      let timed = tokio::time::timeout(self.policy.timeout, self.source.fetch_page(request));
      let result = match timed.await {
        Ok(result) => result,
        Err(_) => Err(PageError::Timeout(self.policy.timeout)),
      };

      match result {
        Ok(body) => {
          trace!(month = %request.month, attempt, "page fetched");
          return Ok(body);
        }
        Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
          debug!(month = %request.month, attempt, error = %e, "retrying page");
          attempt += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }
}
