//! Task descriptors.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use super::progress::Progress;
use super::types::{BoxError, Inputs, Outputs};

/// How a task finished.
///
/// Both variants carry the task's declared outputs and unblock dependents in
/// the same way; `Skipped` only records that no work was needed.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
  Completed(Outputs),
  Skipped(Outputs),
}

impl TaskOutcome {
  pub fn is_skipped(&self) -> bool {
    matches!(self, TaskOutcome::Skipped(_))
  }

  pub fn outputs(&self) -> &Outputs {
    match self {
      TaskOutcome::Completed(outputs) | TaskOutcome::Skipped(outputs) => outputs,
    }
  }

  pub fn into_outputs(self) -> Outputs {
    match self {
      TaskOutcome::Completed(outputs) | TaskOutcome::Skipped(outputs) => outputs,
    }
  }
}

pub type TaskResult = Result<TaskOutcome, BoxError>;
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
pub(crate) type RunFn = Box<dyn FnOnce(Inputs, Progress) -> TaskFuture + Send>;

/// The declarative part of a task: everything except its body.
#[derive(Debug, Clone, Default)]
pub struct TaskSpec {
  pub title: String,
  pub requires: BTreeSet<String>,
  pub provides: BTreeSet<String>,
  pub locks: BTreeSet<String>,
}

/// A named unit of work in a task graph.
pub struct Task {
  spec: TaskSpec,
  run: RunFn,
}

impl Task {
  /// Create a task with no requirements, outputs or locks.
  pub fn new<F, Fut>(title: impl Into<String>, run: F) -> Self
  where
    F: FnOnce(Inputs, Progress) -> Fut + Send + 'static,
    Fut: Future<Output = TaskResult> + Send + 'static,
  {
    Self {
      spec: TaskSpec {
        title: title.into(),
        ..Default::default()
      },
      run: Box::new(move |inputs, progress| Box::pin(run(inputs, progress))),
    }
  }

  pub fn requires<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.spec.requires.extend(keys.into_iter().map(Into::into));
    self
  }

  pub fn provides<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.spec.provides.extend(keys.into_iter().map(Into::into));
    self
  }

  pub fn locks<I, S>(mut self, names: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.spec.locks.extend(names.into_iter().map(Into::into));
    self
  }

  pub fn title(&self) -> &str {
    &self.spec.title
  }

  pub fn spec(&self) -> &TaskSpec {
    &self.spec
  }

  pub(crate) fn into_parts(self) -> (TaskSpec, RunFn) {
    (self.spec, self.run)
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").field("spec", &self.spec).finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builder_collects_keys() {
    let task = Task::new("compile", |_, _| async { Ok(TaskOutcome::Completed(Outputs::new())) })
      .requires(["app-dir", "build-image"])
      .provides(["slug"])
      .locks(["docker"]);

    assert_eq!(task.title(), "compile");
    assert_eq!(task.spec().requires.len(), 2);
    assert!(task.spec().provides.contains("slug"));
    assert!(task.spec().locks.contains("docker"));
  }

  #[test]
  fn outcome_accessors() {
    let mut outputs = Outputs::new();
    outputs.insert("k".to_string(), true.into());

    let skipped = TaskOutcome::Skipped(outputs.clone());
    assert!(skipped.is_skipped());
    assert_eq!(skipped.outputs(), &outputs);

    let completed = TaskOutcome::Completed(outputs.clone());
    assert!(!completed.is_skipped());
    assert_eq!(completed.into_outputs(), outputs);
  }
}
