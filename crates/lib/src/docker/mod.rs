//! Container daemon operations.
//!
//! [`ContainerOps`] is the surface the build pipeline uses: pull, run, build,
//! push, list and a registry lookup, each reporting through a [`Progress`]
//! handle and, where there is output worth keeping, writing a log file.
//! [`DockerAdapter`] is the production implementation.

pub mod daemon;
pub mod progress;
pub mod registry;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::graph::Progress;

pub use daemon::DockerAdapter;
pub use progress::{BuildProgress, ByteCounts, PullEvent, PullProgress};
pub use registry::RegistryClient;

#[derive(Debug, Error)]
pub enum DockerError {
  #[error("failed to connect to the docker daemon")]
  Connect(#[source] bollard::errors::Error),

  #[error("docker {op} failed")]
  Daemon {
    op: &'static str,
    #[source]
    source: bollard::errors::Error,
  },

  #[error("pulling {image} failed: {message}")]
  PullFailed { image: String, message: String },

  #[error("building {tag} failed: {message}; check {} for details", .log.display())]
  BuildFailed { tag: String, log: PathBuf, message: String },

  #[error("container from {image} exited with status {code}; check {} for details", .log.display())]
  ContainerExit { image: String, code: i64, log: PathBuf },

  #[error("push failed! check {} for reason", .log.display())]
  PushFailed { tag: String, log: PathBuf },

  #[error("registry query to {url} failed: {message}")]
  Registry { url: String, message: String },

  #[error("registry query to {url} returned HTTP {status}")]
  RegistryStatus { url: String, status: u16 },

  #[error("failed to spawn {program}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Io(#[from] std::io::Error),
}

/// An image name split into repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
  pub repository: String,
  pub tag: String,
}

impl ImageRef {
  /// Split at the last `:` that follows the last `/`, so registry ports are
  /// kept in the repository. A missing tag means `latest`.
  pub fn parse(image: &str) -> Self {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
      Some(colon) => Self {
        repository: image[..name_start + colon].to_string(),
        tag: image[name_start + colon + 1..].to_string(),
      },
      None => Self {
        repository: image.to_string(),
        tag: "latest".to_string(),
      },
    }
  }
}

impl std::fmt::Display for ImageRef {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.repository, self.tag)
  }
}

/// A one-shot container run.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
  pub image: String,
  pub command: Vec<String>,
  pub env: BTreeMap<String, String>,
  /// Host directory mounted at `/workdir`.
  pub work_dir: PathBuf,
  /// Extra `host:container[:mode]` binds.
  pub binds: Vec<String>,
  /// File receiving the container's combined output.
  pub logfile: PathBuf,
}

#[async_trait]
pub trait ContainerOps: Send + Sync {
  /// Pull `image`, reporting aggregate layer progress.
  async fn pull(&self, image: &str, progress: &Progress) -> Result<(), DockerError>;

  /// Run a container to completion. A non-zero exit is an error.
  async fn run(&self, spec: &RunSpec, progress: &Progress) -> Result<(), DockerError>;

  /// Build `context` (a tar archive containing a `Dockerfile`) as `tag`.
  async fn build(&self, tag: &str, context: Vec<u8>, logfile: &Path, progress: &Progress) -> Result<(), DockerError>;

  /// Publish `tag` to its registry.
  async fn push(&self, tag: &str, logfile: &Path, progress: &Progress) -> Result<(), DockerError>;

  /// Every `repository:tag` known to the local daemon.
  async fn list_images(&self) -> Result<Vec<String>, DockerError>;

  /// Whether the registry already has `tag`.
  async fn registry_has_tag(&self, tag: &str) -> Result<bool, DockerError>;

  async fn image_exists(&self, tag: &str) -> Result<bool, DockerError> {
    Ok(self.list_images().await?.iter().any(|image| image == tag))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_simple_reference() {
    let image = ImageRef::parse("heroku/heroku:16-build");
    assert_eq!(image.repository, "heroku/heroku");
    assert_eq!(image.tag, "16-build");
  }

  #[test]
  fn parse_keeps_registry_port() {
    let image = ImageRef::parse("reg.example:5000/svc:abcd123");
    assert_eq!(image.repository, "reg.example:5000/svc");
    assert_eq!(image.tag, "abcd123");
    assert_eq!(image.to_string(), "reg.example:5000/svc:abcd123");
  }

  #[test]
  fn parse_defaults_to_latest() {
    let image = ImageRef::parse("reg.example:5000/svc");
    assert_eq!(image.repository, "reg.example:5000/svc");
    assert_eq!(image.tag, "latest");
  }

  #[test]
  fn push_error_names_log() {
    let err = DockerError::PushFailed {
      tag: "org/svc:1".to_string(),
      log: PathBuf::from("/work/docker-push.log"),
    };
    assert_eq!(err.to_string(), "push failed! check /work/docker-push.log for reason");
  }
}
