//! In-memory stand-ins for the docker daemon and git, for pipeline tests.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::docker::{ContainerOps, DockerError, RunSpec};
use crate::git::{GitError, SourceControl};
use crate::graph::Progress;

/// Fake daemon: tracks local and registry tags, records every call, and
/// measures how many operations were ever in flight at once.
#[derive(Default)]
pub struct FakeDocker {
  pub local: Mutex<BTreeSet<String>>,
  pub registry: Mutex<BTreeSet<String>>,
  pub calls: Mutex<Vec<String>>,
  pub contexts: Mutex<Vec<(String, Vec<u8>)>>,
  /// Runs whose command contains this string exit with status 1.
  pub fail_run: Mutex<Option<String>>,
  pub fail_build: Mutex<bool>,
  active: AtomicUsize,
  peak: AtomicUsize,
}

impl FakeDocker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_local(self, tag: &str) -> Self {
    self.local.lock().unwrap().insert(tag.to_string());
    self
  }

  pub fn with_registry(self, tag: &str) -> Self {
    self.registry.lock().unwrap().insert(tag.to_string());
    self
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }

  async fn enter(&self, call: String) {
    let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
    self.calls.lock().unwrap().push(call);
    // Give any other ready task a chance to overlap with this one.
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
  }

  fn leave(&self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl ContainerOps for FakeDocker {
  async fn pull(&self, image: &str, progress: &Progress) -> Result<(), DockerError> {
    self.enter(format!("pull {image}")).await;
    progress.percent(100.0);
    self.local.lock().unwrap().insert(image.to_string());
    self.leave();
    Ok(())
  }

  async fn run(&self, spec: &RunSpec, _progress: &Progress) -> Result<(), DockerError> {
    let command = spec.command.join(" ");
    self.enter(format!("run {} {}", spec.image, command)).await;
    let written = std::fs::write(&spec.logfile, format!("{command}\n"));
    let fail = self
      .fail_run
      .lock()
      .unwrap()
      .as_ref()
      .is_some_and(|pattern| command.contains(pattern.as_str()));
    self.leave();
    written?;

    if fail {
      return Err(DockerError::ContainerExit {
        image: spec.image.clone(),
        code: 1,
        log: spec.logfile.clone(),
      });
    }
    Ok(())
  }

  async fn build(&self, tag: &str, context: Vec<u8>, logfile: &Path, _progress: &Progress) -> Result<(), DockerError> {
    self.enter(format!("build {tag}")).await;
    let fail = *self.fail_build.lock().unwrap();
    if !fail {
      self.local.lock().unwrap().insert(tag.to_string());
      self.contexts.lock().unwrap().push((tag.to_string(), context));
    }
    self.leave();

    if fail {
      return Err(DockerError::BuildFailed {
        tag: tag.to_string(),
        log: logfile.to_path_buf(),
        message: "The command '/bin/sh -c exit 1' returned a non-zero code: 1".to_string(),
      });
    }
    Ok(())
  }

  async fn push(&self, tag: &str, _logfile: &Path, _progress: &Progress) -> Result<(), DockerError> {
    self.enter(format!("push {tag}")).await;
    self.registry.lock().unwrap().insert(tag.to_string());
    self.leave();
    Ok(())
  }

  async fn list_images(&self) -> Result<Vec<String>, DockerError> {
    self.enter("list".to_string()).await;
    let images = self.local.lock().unwrap().iter().cloned().collect();
    self.leave();
    Ok(images)
  }

  async fn registry_has_tag(&self, tag: &str) -> Result<bool, DockerError> {
    Ok(self.registry.lock().unwrap().contains(tag))
  }
}

/// Fake git: remotes are a URL to revision map, and a clone writes the
/// configured files plus a `.git/HEAD` holding the revision.
#[derive(Default)]
pub struct FakeGit {
  pub revisions: Mutex<HashMap<String, String>>,
  pub files: Mutex<HashMap<String, Vec<(String, String)>>>,
  /// Revision a clone checks out instead of the remote's current one.
  pub clone_head: Mutex<Option<String>>,
  pub clones: Mutex<Vec<String>>,
}

impl FakeGit {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_repo(self, url: &str, revision: &str, files: &[(&str, &str)]) -> Self {
    self
      .revisions
      .lock()
      .unwrap()
      .insert(url.to_string(), revision.to_string());
    self.files.lock().unwrap().insert(
      url.to_string(),
      files.iter().map(|(p, c)| (p.to_string(), c.to_string())).collect(),
    );
    self
  }

  pub fn clones(&self) -> Vec<String> {
    self.clones.lock().unwrap().clone()
  }
}

#[async_trait]
impl SourceControl for FakeGit {
  async fn list_remote(&self, url: &str, _reference: &str) -> Result<Option<String>, GitError> {
    Ok(self.revisions.lock().unwrap().get(url).cloned())
  }

  async fn clone_shallow(&self, url: &str, _reference: Option<&str>, dest: &Path) -> Result<(), GitError> {
    self.clones.lock().unwrap().push(url.to_string());
    let head = self
      .clone_head
      .lock()
      .unwrap()
      .clone()
      .or_else(|| self.revisions.lock().unwrap().get(url).cloned())
      .unwrap_or_else(|| "0000000".to_string());
    let files = self.files.lock().unwrap().get(url).cloned().unwrap_or_default();

    std::fs::create_dir_all(dest.join(".git")).unwrap();
    std::fs::write(dest.join(".git/HEAD"), &head).unwrap();
    for (path, content) in files {
      let path = dest.join(path);
      if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
      }
      std::fs::write(path, content).unwrap();
    }
    Ok(())
  }

  async fn rev_parse(&self, dir: &Path, _rev: &str) -> Result<String, GitError> {
    std::fs::read_to_string(dir.join(".git/HEAD"))
      .map(|s| s.trim().to_string())
      .map_err(|e| GitError::Command {
        args: "rev-parse HEAD".to_string(),
        code: Some(128),
        stderr: e.to_string(),
      })
  }
}
