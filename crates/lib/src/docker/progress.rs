//! Turning daemon event streams into percentages.
//!
//! The pull stream format is loosely documented, so [`PullProgress`] only
//! relies on per-layer status names and byte counters. Build progress is
//! estimated from the `Step N/M` lines of the classic builder.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// Byte total assumed for a layer that is still waiting to download.
pub const WAITING_LAYER_TOTAL: u64 = 104_857_600;

/// Current/total byte counters carried by a pull event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounts {
  pub current: Option<u64>,
  pub total: Option<u64>,
}

/// One event from an image pull stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullEvent {
  pub id: Option<String>,
  pub status: Option<String>,
  pub detail: Option<ByteCounts>,
}

/// Aggregates pull events across layers into an overall percentage.
///
/// Every layer is assumed to be downloaded and then extracted, with both
/// phases taking the same time per byte.
#[derive(Debug, Default)]
pub struct PullProgress {
  totals: HashMap<String, u64>,
  downloaded: HashMap<String, u64>,
  extracted: HashMap<String, u64>,
}

impl PullProgress {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fold in one event. Returns the new overall percentage if it changed.
  pub fn update(&mut self, event: &PullEvent) -> Option<f64> {
    let id = event.id.as_deref()?;
    let status = event.status.as_deref()?;

    match (status, event.detail) {
      ("Waiting", _) => {
        self.totals.insert(id.to_string(), WAITING_LAYER_TOTAL);
      }
      ("Downloading", Some(detail)) => {
        self.downloaded.insert(id.to_string(), detail.current.unwrap_or(0));
        if let Some(total) = detail.total {
          self.totals.insert(id.to_string(), total);
        }
      }
      ("Extracting", Some(detail)) => {
        self.extracted.insert(id.to_string(), detail.current.unwrap_or(0));
        if let Some(total) = detail.total {
          self.totals.insert(id.to_string(), total);
        }
      }
      _ => return None,
    }

    Some(self.percent())
  }

  pub fn percent(&self) -> f64 {
    let total: u64 = self.totals.values().sum::<u64>() * 2;
    if total == 0 {
      return 0.0;
    }
    let current: u64 = self.downloaded.values().sum::<u64>() + self.extracted.values().sum::<u64>();
    (current as f64 * 100.0 / total as f64).min(100.0)
  }
}

static STEP_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^Step (\d+)/(\d+)").expect("valid regex"));

/// Estimates build progress from builder output.
#[derive(Debug, Default)]
pub struct BuildProgress;

impl BuildProgress {
  pub fn new() -> Self {
    Self
  }

  /// Percentage implied by a `Step N/M` line, `100 * N / (M + 1)`.
  pub fn observe(&mut self, line: &str) -> Option<f64> {
    let caps = STEP_LINE.captures(line)?;
    let step: f64 = caps[1].parse().ok()?;
    let steps: f64 = caps[2].parse().ok()?;
    Some((100.0 * step / (steps + 1.0)).min(100.0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn event(id: &str, status: &str, detail: Option<(u64, u64)>) -> PullEvent {
    PullEvent {
      id: Some(id.to_string()),
      status: Some(status.to_string()),
      detail: detail.map(|(current, total)| ByteCounts {
        current: Some(current),
        total: Some(total),
      }),
    }
  }

  #[test]
  fn download_and_extract_each_count_half() {
    let mut progress = PullProgress::new();
    assert_eq!(progress.update(&event("l1", "Downloading", Some((50, 100)))), Some(25.0));
    assert_eq!(progress.update(&event("l1", "Downloading", Some((100, 100)))), Some(50.0));
    assert_eq!(progress.update(&event("l1", "Extracting", Some((100, 100)))), Some(100.0));
  }

  #[test]
  fn waiting_layers_assume_a_hundred_mebibytes() {
    let mut progress = PullProgress::new();
    progress.update(&event("a", "Waiting", None));
    let pct = progress
      .update(&event("b", "Downloading", Some((WAITING_LAYER_TOTAL, WAITING_LAYER_TOTAL))))
      .unwrap();
    assert!((pct - 25.0).abs() < f64::EPSILON);
  }

  #[test]
  fn events_without_detail_are_ignored() {
    let mut progress = PullProgress::new();
    assert_eq!(progress.update(&event("l1", "Downloading", None)), None);
    assert_eq!(progress.update(&event("l1", "Pull complete", None)), None);
    assert_eq!(
      progress.update(&PullEvent {
        status: Some("Pulling from heroku/heroku".to_string()),
        ..Default::default()
      }),
      None
    );
    assert_eq!(progress.percent(), 0.0);
  }

  #[test]
  fn percent_is_capped() {
    let mut progress = PullProgress::new();
    progress.update(&event("l1", "Downloading", Some((500, 100))));
    assert_eq!(progress.update(&event("l1", "Extracting", Some((500, 100)))), Some(100.0));
  }

  #[test]
  fn build_steps_map_to_percent() {
    let mut progress = BuildProgress::new();
    assert_eq!(progress.observe("Step 1/3 : FROM heroku/heroku:16"), Some(25.0));
    assert_eq!(progress.observe("Step 3/3 : ENTRYPOINT [\"/app/entrypoint\"]"), Some(75.0));
    assert_eq!(progress.observe(" ---> Running in 1234"), None);
    assert_eq!(progress.observe("Removing intermediate container; Step 2/3"), None);
  }
}
