/// Decision after observing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Continue,
  Stop,
}

/// Counts consecutive batches that produced no records.
///
/// A heuristic for latency, not completeness: older months past a long empty
/// stretch are never asked for.
#[derive(Debug, Clone)]
pub struct EmptyBatchMonitor {
  threshold: u32,
  consecutive_empty: u32,
}

impl EmptyBatchMonitor {
  /// `threshold` of 0 never stops.
  pub fn new(threshold: u32) -> Self {
    Self {
      threshold,
      consecutive_empty: 0,
    }
  }

  pub fn observe(&mut self, had_records: bool) -> Verdict {
    if had_records {
      self.consecutive_empty = 0;
    } else {
      self.consecutive_empty += 1;
    }

    if self.threshold > 0 && self.consecutive_empty >= self.threshold {
      Verdict::Stop
    } else {
      Verdict::Continue
    }
  }

  pub fn consecutive_empty(&self) -> u32 {
    self.consecutive_empty
  }
}
