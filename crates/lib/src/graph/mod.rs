//! Task graph execution.
//!
//! A run takes a list of [`Task`]s that declare the context keys they
//! `require` and `provide`, plus the named locks they hold while running.
//! Tasks start as soon as their inputs exist and none of their locks are held
//! by a running task; every output is merged into a shared context that later
//! tasks read from.
//!
//! - Validation happens up front (see [`dag`]), before any task runs
//! - The first failure stops new tasks from starting; running tasks drain
//! - `Skipped` outcomes unblock dependents exactly like `Completed`

pub mod dag;
pub mod progress;
pub mod task;
pub mod types;

use std::collections::HashSet;

use tokio::sync::mpsc::unbounded_channel;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

pub use dag::TaskDag;
pub use progress::{Progress, ProgressEvent};
pub use task::{Task, TaskOutcome, TaskResult, TaskSpec};
pub use types::{BoxError, Context, GraphError, InputError, Inputs, Outputs, Value};

use task::RunFn;

/// Something that happened during a graph run.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
  Started { title: String },
  Progress { title: String, event: ProgressEvent },
  Finished { title: String, skipped: bool },
  Failed { title: String, message: String },
}

/// Receives events from a graph run.
///
/// Called from the engine loop, so implementations should return quickly.
pub trait Observer: Send + Sync {
  fn on_event(&self, event: &GraphEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {
  fn on_event(&self, _event: &GraphEvent) {}
}

/// The result of a successful run.
#[derive(Debug, Clone, Default)]
pub struct GraphOutput {
  pub context: Context,
  /// Titles of tasks that did work, in completion order.
  pub completed: Vec<String>,
  /// Titles of tasks that reported `Skipped`, in completion order.
  pub skipped: Vec<String>,
}

type Joined = (usize, Result<TaskResult, JoinError>);

/// Run a task graph to completion.
///
/// # Arguments
///
/// * `tasks` - The tasks to run; declaration order breaks ties between tasks
///   contending for a lock
/// * `observer` - Receives start, progress, finish and failure events
///
/// # Returns
///
/// The merged context and the completed/skipped task titles, or the first
/// error encountered.
pub async fn run_graph(tasks: Vec<Task>, observer: &dyn Observer) -> Result<GraphOutput, GraphError> {
  let (specs, mut pending): (Vec<TaskSpec>, Vec<Option<RunFn>>) = tasks
    .into_iter()
    .map(|task| {
      let (spec, run) = task.into_parts();
      (spec, Some(run))
    })
    .unzip();

  let dag = TaskDag::build(&specs)?;
  let waves = dag.waves();
  info!(task_count = dag.task_count(), wave_count = waves.len(), "starting task graph");
  for (wave, members) in waves.iter().enumerate() {
    let titles: Vec<&str> = members.iter().map(|&idx| specs[idx].title.as_str()).collect();
    debug!(wave, tasks = ?titles, "planned wave");
  }

  let (tx, mut rx) = unbounded_channel();
  let mut join_set: JoinSet<Joined> = JoinSet::new();
  let mut held: HashSet<String> = HashSet::new();
  let mut output = GraphOutput::default();
  let mut failure: Option<GraphError> = None;

  loop {
    if failure.is_none() {
      for (idx, spec) in specs.iter().enumerate() {
        if pending[idx].is_none() {
          continue;
        }
        if !spec.requires.iter().all(|key| output.context.contains_key(key)) {
          continue;
        }
        if spec.locks.iter().any(|lock| held.contains(lock)) {
          continue;
        }
        let Some(run) = pending[idx].take() else {
          continue;
        };

        held.extend(spec.locks.iter().cloned());
        let inputs = Inputs::select(&output.context, &spec.requires);
        let progress = Progress::new(idx, tx.clone());

        debug!(task = %spec.title, locks = ?spec.locks, "starting task");
        observer.on_event(&GraphEvent::Started {
          title: spec.title.clone(),
        });

        // The inner spawn isolates panics so they can be attributed to a task.
        let handle = tokio::spawn(run(inputs, progress));
        join_set.spawn(async move { (idx, handle.await) });
      }
    }

    if join_set.is_empty() {
      break;
    }

    tokio::select! {
      biased;
      Some((idx, event)) = rx.recv() => {
        observer.on_event(&GraphEvent::Progress { title: specs[idx].title.clone(), event });
      }
      Some(joined) = join_set.join_next() => {
        while let Ok((idx, event)) = rx.try_recv() {
          observer.on_event(&GraphEvent::Progress { title: specs[idx].title.clone(), event });
        }
        match joined {
          Ok((idx, result)) => {
            for lock in &specs[idx].locks {
              held.remove(lock);
            }
            if let Err(err) = finish_task(&specs[idx], result, &mut output, observer) {
              if failure.is_none() {
                failure = Some(err);
              }
            }
          }
          Err(err) => {
            // The wrapper only awaits a handle; this means the runtime is shutting down.
            error!(error = %err, "task wrapper aborted");
          }
        }
      }
      else => break,
    }
  }

  drop(tx);
  while let Ok((idx, event)) = rx.try_recv() {
    observer.on_event(&GraphEvent::Progress {
      title: specs[idx].title.clone(),
      event,
    });
  }

  if let Some(err) = failure {
    error!(error = %err, "task graph failed");
    return Err(err);
  }

  let leftover: Vec<String> = specs
    .iter()
    .zip(&pending)
    .filter(|(_, run)| run.is_some())
    .map(|(spec, _)| spec.title.clone())
    .collect();
  if !leftover.is_empty() {
    return Err(GraphError::Unsatisfiable(leftover));
  }

  info!(
    completed = output.completed.len(),
    skipped = output.skipped.len(),
    "task graph complete"
  );
  Ok(output)
}

fn finish_task(
  spec: &TaskSpec,
  result: Result<TaskResult, JoinError>,
  output: &mut GraphOutput,
  observer: &dyn Observer,
) -> Result<(), GraphError> {
  let title = spec.title.clone();

  let outcome = match result {
    Ok(Ok(outcome)) => outcome,
    Ok(Err(source)) => {
      error!(task = %title, error = %source, "task failed");
      observer.on_event(&GraphEvent::Failed {
        title: title.clone(),
        message: source.to_string(),
      });
      return Err(GraphError::TaskFailed { title, source });
    }
    Err(join_err) => {
      error!(task = %title, error = %join_err, "task panicked");
      observer.on_event(&GraphEvent::Failed {
        title: title.clone(),
        message: "task panicked".to_string(),
      });
      return Err(GraphError::TaskPanicked(title));
    }
  };

  if let Err(err) = check_outputs(spec, outcome.outputs()) {
    observer.on_event(&GraphEvent::Failed {
      title,
      message: err.to_string(),
    });
    return Err(err);
  }

  let skipped = outcome.is_skipped();
  for (key, value) in outcome.into_outputs() {
    output.context.entry(key).or_insert(value);
  }

  debug!(task = %title, skipped, "task finished");
  if skipped {
    output.skipped.push(title.clone());
  } else {
    output.completed.push(title.clone());
  }
  observer.on_event(&GraphEvent::Finished { title, skipped });
  Ok(())
}

fn check_outputs(spec: &TaskSpec, outputs: &Outputs) -> Result<(), GraphError> {
  if let Some(key) = spec.provides.iter().find(|key| !outputs.contains_key(*key)) {
    return Err(GraphError::MissingOutput {
      task: spec.title.clone(),
      key: key.clone(),
    });
  }
  if let Some(key) = outputs.keys().find(|key| !spec.provides.contains(*key)) {
    return Err(GraphError::UndeclaredOutput {
      task: spec.title.clone(),
      key: key.clone(),
    });
  }
  Ok(())
}
