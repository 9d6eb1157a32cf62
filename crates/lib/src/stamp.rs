//! Build stamps.
//!
//! A stamp is a small JSON file written into a directory after a step has
//! produced its contents. It records the ordered list of sources the contents
//! were derived from (source revision, buildpack, stack) and their SHA-256
//! fingerprint. A later run compares its own sources against the stamp to
//! decide whether the step can be skipped.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::consts::STAMP_FILENAME;

const STAMP_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StampError {
  #[error("failed to write stamp {}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize stamp")]
  Serialize(#[from] serde_json::Error),
}

/// Contents of a stamp file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
  pub version: u32,
  pub fingerprint: String,
  pub sources: Vec<String>,
}

impl Stamp {
  pub fn new(sources: &[String]) -> Self {
    Self {
      version: STAMP_VERSION,
      fingerprint: fingerprint(sources),
      sources: sources.to_vec(),
    }
  }

  /// Whether this stamp was written for exactly `sources`, in order.
  pub fn matches(&self, sources: &[String]) -> bool {
    self.version == STAMP_VERSION && self.sources == sources && self.fingerprint == fingerprint(sources)
  }
}

/// SHA-256 over the length-prefixed source strings, as lowercase hex.
pub fn fingerprint(sources: &[String]) -> String {
  let mut hasher = Sha256::new();
  for source in sources {
    // Length-prefix each entry so ["ab", "c"] and ["a", "bc"] differ.
    hasher.update((source.len() as u64).to_le_bytes());
    hasher.update(source.as_bytes());
  }
  hex::encode(hasher.finalize())
}

pub fn stamp_path(dir: &Path) -> PathBuf {
  dir.join(STAMP_FILENAME)
}

/// Read the stamp in `dir`, if there is a readable one.
pub fn read_stamp(dir: &Path) -> Option<Stamp> {
  let path = stamp_path(dir);
  let content = match std::fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) => {
      debug!(path = %path.display(), error = %e, "no readable stamp");
      return None;
    }
  };
  match serde_json::from_str(&content) {
    Ok(stamp) => Some(stamp),
    Err(e) => {
      debug!(path = %path.display(), error = %e, "ignoring corrupt stamp");
      None
    }
  }
}

/// Whether `dir` carries a stamp for exactly `sources`.
///
/// Missing, unreadable and corrupt stamps all count as "not stamped".
pub fn is_stamped(dir: &Path, sources: &[String]) -> bool {
  read_stamp(dir).is_some_and(|stamp| stamp.matches(sources))
}

/// Record that the contents of `dir` were produced from `sources`.
pub fn write_stamp(dir: &Path, sources: &[String]) -> Result<(), StampError> {
  let path = stamp_path(dir);
  let content = serde_json::to_string_pretty(&Stamp::new(sources))?;
  std::fs::write(&path, content).map_err(|source| StampError::Write { path: path.clone(), source })?;
  debug!(path = %path.display(), "wrote stamp");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;
  use tracing_test::traced_test;

  fn sources(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn unstamped_dir_is_not_stamped() {
    let temp = TempDir::new().unwrap();
    assert!(!is_stamped(temp.path(), &sources(&["a"])));
  }

  #[test]
  fn stamp_matches_same_sources() {
    let temp = TempDir::new().unwrap();
    let srcs = sources(&["https://example.test/svc#abcd123", "https://buildpack", "heroku-16"]);
    write_stamp(temp.path(), &srcs).unwrap();

    assert!(is_stamped(temp.path(), &srcs));
    assert_eq!(read_stamp(temp.path()).unwrap().fingerprint, fingerprint(&srcs));
  }

  #[test]
  fn changed_or_reordered_sources_do_not_match() {
    let temp = TempDir::new().unwrap();
    write_stamp(temp.path(), &sources(&["a", "b"])).unwrap();

    assert!(!is_stamped(temp.path(), &sources(&["a", "c"])));
    assert!(!is_stamped(temp.path(), &sources(&["b", "a"])));
    assert!(!is_stamped(temp.path(), &sources(&["a"])));
  }

  #[test]
  #[traced_test]
  fn corrupt_stamp_is_ignored() {
    let temp = TempDir::new().unwrap();
    std::fs::write(stamp_path(temp.path()), "{not json").unwrap();
    assert!(!is_stamped(temp.path(), &sources(&["a"])));
    assert!(logs_contain("ignoring corrupt stamp"));
  }

  #[test]
  fn tampered_fingerprint_is_rejected() {
    let temp = TempDir::new().unwrap();
    let srcs = sources(&["a"]);
    let mut stamp = Stamp::new(&srcs);
    stamp.fingerprint = "0".repeat(64);
    std::fs::write(stamp_path(temp.path()), serde_json::to_string(&stamp).unwrap()).unwrap();
    assert!(!is_stamped(temp.path(), &srcs));
  }

  #[test]
  fn fingerprint_separates_entries() {
    assert_ne!(fingerprint(&sources(&["ab", "c"])), fingerprint(&sources(&["a", "bc"])));
    assert_eq!(fingerprint(&sources(&["x"])).len(), 64);
  }

  #[test]
  fn write_into_missing_dir_fails() {
    let temp = TempDir::new().unwrap();
    let err = write_stamp(&temp.path().join("nope"), &sources(&["a"])).unwrap_err();
    assert!(matches!(err, StampError::Write { .. }));
  }
}
