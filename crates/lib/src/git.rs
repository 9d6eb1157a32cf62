//! Source control operations.
//!
//! Only three operations are needed: resolving a symbolic ref on a remote,
//! making a shallow checkout of it, and reading back a checkout's revision.
//! [`GitCli`] implements them by invoking the `git` binary.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum GitError {
  #[error("failed to spawn {program}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error("git {args} exited with code {code:?}: {stderr}")]
  Command {
    args: String,
    code: Option<i32>,
    stderr: String,
  },
}

#[async_trait]
pub trait SourceControl: Send + Sync {
  /// Resolve `reference` on the remote at `url` to a revision.
  ///
  /// Returns `None` if the remote has no such ref.
  async fn list_remote(&self, url: &str, reference: &str) -> Result<Option<String>, GitError>;

  /// Shallow, single-branch clone of `url` into `dest`.
  ///
  /// Clones the remote's default branch when `reference` is `None`.
  async fn clone_shallow(&self, url: &str, reference: Option<&str>, dest: &Path) -> Result<(), GitError>;

  /// Resolve `rev` (e.g. `HEAD`) in the checkout at `dir`.
  async fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String, GitError>;
}

/// [`SourceControl`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
  program: PathBuf,
}

impl Default for GitCli {
  fn default() -> Self {
    Self::new("git")
  }
}

impl GitCli {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self { program: program.into() }
  }

  async fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, GitError> {
    let mut command = Command::new(&self.program);
    command.args(args).env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
      command.current_dir(dir);
    }

    debug!(args = ?args, "running git");
    let output = command.output().await.map_err(|source| GitError::Spawn {
      program: self.program.display().to_string(),
      source,
    })?;

    if !output.status.success() {
      return Err(GitError::Command {
        args: args.join(" "),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
  }
}

/// Whether `reference` looks like a full commit id rather than a ref name.
fn is_full_sha(reference: &str) -> bool {
  reference.len() == 40 && reference.chars().all(|c| c.is_ascii_hexdigit())
}

/// Pick the commit `clone --branch <reference>` would check out from
/// `ls-remote` output.
///
/// `ls-remote` matches patterns against trailing path components, so `main`
/// also lists `refs/heads/feature/main`. Only exact ref names count: a branch
/// wins over a tag, and an annotated tag resolves to its peeled commit.
fn pick_revision(ls_remote: &str, reference: &str) -> Option<String> {
  let refs: Vec<(&str, &str)> = ls_remote
    .lines()
    .filter_map(|line| line.split_once(char::is_whitespace))
    .map(|(rev, name)| (rev, name.trim()))
    .collect();

  let wanted = [
    format!("refs/heads/{reference}"),
    format!("refs/tags/{reference}^{{}}"),
    format!("refs/tags/{reference}"),
    reference.to_string(),
  ];
  wanted
    .iter()
    .find_map(|name| refs.iter().find(|(_, refname)| refname == name))
    .map(|(rev, _)| rev.to_string())
}

#[async_trait]
impl SourceControl for GitCli {
  async fn list_remote(&self, url: &str, reference: &str) -> Result<Option<String>, GitError> {
    let stdout = self.run(&["ls-remote", url, reference], None).await?;

    match pick_revision(&stdout, reference) {
      Some(rev) => Ok(Some(rev)),
      // ls-remote only matches ref names; a pinned commit resolves to itself.
      None if is_full_sha(reference) => Ok(Some(reference.to_lowercase())),
      None => Ok(None),
    }
  }

  async fn clone_shallow(&self, url: &str, reference: Option<&str>, dest: &Path) -> Result<(), GitError> {
    let dest_str = dest.to_string_lossy();
    info!(url = %url, reference = ?reference, dest = %dest.display(), "cloning");

    // `--branch` only takes ref names; a pinned commit is fetched directly.
    if let Some(sha) = reference.filter(|r| is_full_sha(r)) {
      let sha = sha.to_lowercase();
      self.run(&["init", "--quiet", dest_str.as_ref()], None).await?;
      self
        .run(&["fetch", "--quiet", "--depth=1", url, sha.as_str()], Some(dest))
        .await?;
      self.run(&["checkout", "--quiet", "FETCH_HEAD"], Some(dest)).await?;
      return Ok(());
    }

    let mut args = vec!["clone", "--quiet", "--depth=1", "--single-branch"];
    if let Some(reference) = reference {
      args.extend(["--branch", reference]);
    }
    args.extend([url, dest_str.as_ref()]);
    self.run(&args, None).await?;
    Ok(())
  }

  async fn rev_parse(&self, dir: &Path, rev: &str) -> Result<String, GitError> {
    let stdout = self.run(&["rev-parse", rev], Some(dir)).await?;
    Ok(stdout.trim().to_string())
  }
}
