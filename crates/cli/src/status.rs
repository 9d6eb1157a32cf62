//! Live status lines for a running build.
//!
//! One overall bar counts finished against started tasks; every running task
//! gets a spinner showing its latest step, message or percentage.

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;

use dockyard_lib::graph::{GraphEvent, Observer, ProgressEvent};

use crate::output::symbols;

static OVERALL_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
  ProgressStyle::default_bar()
    .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    .expect("valid progress template")
    .progress_chars("=>-")
});

static TASK_STYLE: LazyLock<ProgressStyle> = LazyLock::new(|| {
  ProgressStyle::default_spinner()
    .template("{spinner:.blue} {prefix:.bold} {msg}")
    .expect("valid progress template")
});

/// Renders graph events as terminal progress bars.
pub struct StatusObserver {
  multi: MultiProgress,
  overall: ProgressBar,
  running: Mutex<HashMap<String, ProgressBar>>,
}

impl StatusObserver {
  pub fn new() -> Self {
    let multi = MultiProgress::new();
    let overall = multi.add(ProgressBar::new(0));
    overall.set_style(OVERALL_STYLE.clone());
    overall.set_message("Building...");
    Self {
      multi,
      overall,
      running: Mutex::new(HashMap::new()),
    }
  }

  pub fn finish(&self) {
    self.overall.finish_and_clear();
  }

  fn start(&self, title: &str) {
    let bar = self.multi.add(ProgressBar::new_spinner());
    bar.set_style(TASK_STYLE.clone());
    bar.set_prefix(title.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    self.overall.inc_length(1);
    if let Ok(mut running) = self.running.lock() {
      running.insert(title.to_string(), bar);
    }
  }

  fn take(&self, title: &str) -> Option<ProgressBar> {
    self.running.lock().ok().and_then(|mut running| running.remove(title))
  }

  fn update(&self, title: &str, event: &ProgressEvent) {
    let Ok(running) = self.running.lock() else {
      return;
    };
    let Some(bar) = running.get(title) else {
      return;
    };
    match event {
      ProgressEvent::Step(step) => bar.set_message(step.clone()),
      ProgressEvent::Message(text) => bar.set_message(text.clone()),
      ProgressEvent::Percent(percent) => bar.set_message(format!("{percent:.0}%")),
    }
  }
}

impl Default for StatusObserver {
  fn default() -> Self {
    Self::new()
  }
}

impl Observer for StatusObserver {
  fn on_event(&self, event: &GraphEvent) {
    match event {
      GraphEvent::Started { title } => self.start(title),
      GraphEvent::Progress { title, event } => self.update(title, event),
      GraphEvent::Finished { title, skipped } => {
        if let Some(bar) = self.take(title) {
          bar.finish_and_clear();
        }
        let line = if *skipped {
          format!("{} {} {}", symbols::SKIP.dimmed(), title, "(skipped)".dimmed())
        } else {
          format!("{} {}", symbols::SUCCESS.green(), title)
        };
        let _ = self.multi.println(line);
        self.overall.inc(1);
      }
      GraphEvent::Failed { title, message } => {
        if let Some(bar) = self.take(title) {
          bar.finish_and_clear();
        }
        let _ = self
          .multi
          .println(format!("{} {}: {}", symbols::ERROR.red(), title, message.red()));
      }
    }
  }
}
