//! Error and value types for task graph execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type returned by a task's run function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A value stored in the result context.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  String(String),
  Path(PathBuf),
  Bool(bool),
  /// Structured data that only the producing and consuming tasks interpret.
  Json(serde_json::Value),
}

impl Value {
  fn kind(&self) -> &'static str {
    match self {
      Value::String(_) => "string",
      Value::Path(_) => "path",
      Value::Bool(_) => "bool",
      Value::Json(_) => "json",
    }
  }
}

impl From<String> for Value {
  fn from(value: String) -> Self {
    Value::String(value)
  }
}

impl From<&str> for Value {
  fn from(value: &str) -> Self {
    Value::String(value.to_string())
  }
}

impl From<PathBuf> for Value {
  fn from(value: PathBuf) -> Self {
    Value::Path(value)
  }
}

impl From<&Path> for Value {
  fn from(value: &Path) -> Self {
    Value::Path(value.to_path_buf())
  }
}

impl From<bool> for Value {
  fn from(value: bool) -> Self {
    Value::Bool(value)
  }
}

impl From<serde_json::Value> for Value {
  fn from(value: serde_json::Value) -> Self {
    Value::Json(value)
  }
}

/// The shared result context: every output produced so far, keyed by name.
pub type Context = BTreeMap<String, Value>;

/// Outputs returned by a single task.
pub type Outputs = BTreeMap<String, Value>;

/// Errors raised while reading a task's inputs.
#[derive(Debug, Error)]
pub enum InputError {
  #[error("input '{0}' is not available")]
  Missing(String),

  #[error("input '{key}' is a {actual}, expected a {expected}")]
  WrongType {
    key: String,
    expected: &'static str,
    actual: &'static str,
  },

  #[error("input '{key}' could not be decoded: {source}")]
  Decode {
    key: String,
    #[source]
    source: serde_json::Error,
  },
}

/// The required values handed to a task when it starts.
///
/// Contains exactly the keys the task declared in `requires`.
#[derive(Debug, Clone, Default)]
pub struct Inputs(BTreeMap<String, Value>);

impl Inputs {
  pub(crate) fn select<'a>(context: &Context, keys: impl IntoIterator<Item = &'a String>) -> Self {
    Inputs(
      keys
        .into_iter()
        .filter_map(|key| context.get(key).map(|value| (key.clone(), value.clone())))
        .collect(),
    )
  }

  pub fn get(&self, key: &str) -> Result<&Value, InputError> {
    self.0.get(key).ok_or_else(|| InputError::Missing(key.to_string()))
  }

  pub fn string(&self, key: &str) -> Result<&str, InputError> {
    match self.get(key)? {
      Value::String(s) => Ok(s),
      other => Err(wrong_type(key, "string", other)),
    }
  }

  pub fn path(&self, key: &str) -> Result<&Path, InputError> {
    match self.get(key)? {
      Value::Path(p) => Ok(p),
      other => Err(wrong_type(key, "path", other)),
    }
  }

  pub fn bool(&self, key: &str) -> Result<bool, InputError> {
    match self.get(key)? {
      Value::Bool(b) => Ok(*b),
      other => Err(wrong_type(key, "bool", other)),
    }
  }

  pub fn json<T: DeserializeOwned>(&self, key: &str) -> Result<T, InputError> {
    match self.get(key)? {
      Value::Json(v) => serde_json::from_value(v.clone()).map_err(|source| InputError::Decode {
        key: key.to_string(),
        source,
      }),
      other => Err(wrong_type(key, "json", other)),
    }
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<(String, Value)> for Inputs {
  fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
    Inputs(iter.into_iter().collect())
  }
}

fn wrong_type(key: &str, expected: &'static str, actual: &Value) -> InputError {
  InputError::WrongType {
    key: key.to_string(),
    expected,
    actual: actual.kind(),
  }
}

/// Errors that can occur while validating or running a task graph.
#[derive(Debug, Error)]
pub enum GraphError {
  /// Two tasks share a title.
  #[error("duplicate task title: {0}")]
  DuplicateTitle(String),

  /// More than one task declares the same output.
  #[error("'{key}' is provided by both '{first}' and '{second}'")]
  DuplicateProvider { key: String, first: String, second: String },

  /// A task requires an output that no task declares.
  #[error("task '{task}' requires '{key}', which no task provides")]
  MissingProvider { key: String, task: String },

  /// The requires/provides edges form a cycle.
  #[error("dependency cycle detected at task '{0}'")]
  CycleDetected(String),

  /// A task finished without one of its declared outputs.
  #[error("task '{task}' did not provide declared output '{key}'")]
  MissingOutput { task: String, key: String },

  /// A task returned an output it never declared.
  #[error("task '{task}' returned undeclared output '{key}'")]
  UndeclaredOutput { task: String, key: String },

  /// A task's run function returned an error.
  #[error("task '{title}' failed")]
  TaskFailed {
    title: String,
    #[source]
    source: BoxError,
  },

  /// A task panicked.
  #[error("task '{0}' panicked")]
  TaskPanicked(String),

  /// Tasks were left that could never become eligible.
  #[error("tasks could not be scheduled: {}", .0.join(", "))]
  Unsatisfiable(Vec<String>),
}

#[cfg(test)]
mod tests {
  use super::*;

  fn inputs() -> Inputs {
    [
      ("name".to_string(), Value::from("svc")),
      ("dir".to_string(), Value::from(PathBuf::from("/work/app"))),
      ("exists".to_string(), Value::from(true)),
      ("config".to_string(), Value::from(serde_json::json!({ "stack": "heroku-16" }))),
    ]
    .into_iter()
    .collect()
  }

  #[test]
  fn typed_accessors_return_values() {
    let inputs = inputs();
    assert_eq!(inputs.string("name").unwrap(), "svc");
    assert_eq!(inputs.path("dir").unwrap(), Path::new("/work/app"));
    assert!(inputs.bool("exists").unwrap());

    #[derive(serde::Deserialize)]
    struct Config {
      stack: String,
    }
    let config: Config = inputs.json("config").unwrap();
    assert_eq!(config.stack, "heroku-16");
  }

  #[test]
  fn missing_key_is_reported() {
    let err = inputs().string("nope").unwrap_err();
    assert!(matches!(err, InputError::Missing(ref k) if k == "nope"));
  }

  #[test]
  fn wrong_type_names_both_kinds() {
    let err = inputs().bool("name").unwrap_err();
    assert_eq!(err.to_string(), "input 'name' is a string, expected a bool");
  }

  #[test]
  fn select_only_copies_requested_keys() {
    let mut context = Context::new();
    context.insert("a".to_string(), Value::from("1"));
    context.insert("b".to_string(), Value::from("2"));

    let keys = vec!["b".to_string()];
    let selected = Inputs::select(&context, &keys);
    assert_eq!(selected.len(), 1);
    assert_eq!(selected.string("b").unwrap(), "2");
    assert!(selected.get("a").is_err());
  }

  #[test]
  fn unsatisfiable_lists_titles() {
    let err = GraphError::Unsatisfiable(vec!["a".to_string(), "b".to_string()]);
    assert_eq!(err.to_string(), "tasks could not be scheduled: a, b");
  }
}
