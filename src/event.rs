use tokio::sync::mpsc;

use crate::rtms::types::YearMonth;

/// Progress of a top-level fetch, emitted by the collection engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
  /// A batch was dispatched
  BatchStarted {
    entity: String,
    batch: usize,
    newest: YearMonth,
    oldest: YearMonth,
  },
  /// Every page of a batch resolved
  BatchCompleted {
    entity: String,
    batch: usize,
    records: usize,
    failed_pages: usize,
  },
  /// A page still failed after its retry and counts as empty
  PageFailed {
    entity: String,
    month: YearMonth,
    error: String,
  },
  /// The empty-batch limit was reached; no older batches will be planned
  TerminationReached {
    entity: String,
    consecutive_empty: u32,
  },
  /// The fetch observed its cancellation token
  Cancelled { entity: String },
  /// The fetch produced its final record set
  Finished { entity: String, records: usize },
}

/// Sending half handed to the engine. Sending never blocks and a dropped
/// receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
  tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
  /// A sink with no subscriber.
  pub fn disabled() -> Self {
    Self { tx: None }
  }

  pub fn emit(&self, event: ProgressEvent) {
    if let Some(tx) = &self.tx {
      let _ = tx.send(event);
    }
  }
}

/// Receiving half, consumed by whoever wants progress (CLI logger, tests).
pub struct ProgressStream {
  rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
  /// Receive the next event; `None` once every sink is dropped.
  pub async fn next(&mut self) -> Option<ProgressEvent> {
    self.rx.recv().await
  }

  /// Drain whatever is already queued without waiting.
  #[cfg(test)]
  pub fn drain(&mut self) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = self.rx.try_recv() {
      events.push(event);
    }
    events
  }
}

/// Create a connected sink/stream pair.
pub fn channel() -> (ProgressSink, ProgressStream) {
  let (tx, rx) = mpsc::unbounded_channel();
  (ProgressSink { tx: Some(tx) }, ProgressStream { rx })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_events_arrive_in_order() {
    let (sink, mut stream) = channel();
    sink.emit(ProgressEvent::Cancelled {
      entity: "a".into(),
    });
    sink.emit(ProgressEvent::Finished {
      entity: "a".into(),
      records: 3,
    });
    drop(sink);

    assert!(matches!(stream.next().await, Some(ProgressEvent::Cancelled { .. })));
    assert!(matches!(
      stream.next().await,
      Some(ProgressEvent::Finished { records: 3, .. })
    ));
    assert!(stream.next().await.is_none());
  }

  #[test]
  fn test_disabled_sink_swallows_events() {
    let sink = ProgressSink::disabled();
    sink.emit(ProgressEvent::Finished {
      entity: "a".into(),
      records: 0,
    });
  }
}
