//! Progress reporting from running tasks.
//!
//! Each task receives a [`Progress`] handle. Calls on it never block: events
//! are queued on an unbounded channel and drained by the engine loop, which
//! forwards them to the run's [`Observer`](super::Observer).

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// A discrete progress update from a task.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
  /// The task moved on to a new named step.
  Step(String),
  /// Free-text status, e.g. a log line from a container.
  Message(String),
  /// Completion of the current step, 0 to 100.
  Percent(f64),
}

/// Handle a task uses to report progress.
#[derive(Debug, Clone)]
pub struct Progress {
  index: usize,
  tx: UnboundedSender<(usize, ProgressEvent)>,
}

impl Progress {
  pub(crate) fn new(index: usize, tx: UnboundedSender<(usize, ProgressEvent)>) -> Self {
    Self { index, tx }
  }

  /// A handle paired with its receiving end, tagged with index 0.
  pub fn channel() -> (Self, UnboundedReceiver<(usize, ProgressEvent)>) {
    let (tx, rx) = unbounded_channel();
    (Self::new(0, tx), rx)
  }

  /// A handle whose events go nowhere.
  pub fn detached() -> Self {
    Self::channel().0
  }

  pub fn step(&self, title: impl Into<String>) {
    self.send(ProgressEvent::Step(title.into()));
  }

  pub fn message(&self, text: impl Into<String>) {
    self.send(ProgressEvent::Message(text.into()));
  }

  pub fn percent(&self, value: f64) {
    self.send(ProgressEvent::Percent(value.clamp(0.0, 100.0)));
  }

  fn send(&self, event: ProgressEvent) {
    // The receiver is gone once the run is over; late events are dropped.
    let _ = self.tx.send((self.index, event));
  }
}
