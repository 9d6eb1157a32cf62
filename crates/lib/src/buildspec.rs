//! Build specification loading.
//!
//! A build spec is a YAML document naming the repositories that make up a
//! release and, for services, how to build them:
//!
//! ```yaml
//! docker:
//!   repositoryPrefix: registry.example/
//! repositories:
//!   - name: queue
//!     source: https://github.com/example/queue#main
//!     kind: service
//!     docs:
//!       tier: core
//!     service:
//!       stack: heroku-18
//! ```

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::service::BuildConfigOverride;
use crate::source::Source;

#[derive(Debug, Error)]
pub enum SpecError {
  #[error("failed to read build spec {}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid build spec {}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("repository name must not be empty")]
  EmptyName,

  #[error("repository '{0}' is listed more than once")]
  DuplicateName(String),

  #[error("repository '{0}' has an empty source")]
  EmptySource(String),
}

/// Docker settings shared by every service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DockerSettings {
  /// Prepended to service names, e.g. `registry.example/`.
  #[serde(default)]
  pub repository_prefix: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
  Service,
  #[default]
  Other,
}

/// One repository entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
  pub name: String,
  /// `url#ref`; the ref defaults to `master`.
  pub source: String,
  #[serde(default)]
  pub kind: RepositoryKind,
  /// Documentation settings. Their presence turns on docs generation.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub docs: Option<serde_yaml::Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub service: Option<BuildConfigOverride>,
}

impl Repository {
  pub fn source(&self) -> Source {
    Source::parse(&self.source)
  }

  pub fn is_service(&self) -> bool {
    self.kind == RepositoryKind::Service
  }

  pub fn has_docs(&self) -> bool {
    self.docs.as_ref().is_some_and(|docs| !docs.is_null())
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
  #[serde(default)]
  pub docker: DockerSettings,
  #[serde(default)]
  pub repositories: Vec<Repository>,
}

impl BuildSpec {
  /// Parse a spec from YAML text and validate it.
  ///
  /// `origin` is only used in error messages.
  pub fn parse(content: &str, origin: &Path) -> Result<Self, SpecError> {
    let spec: BuildSpec = serde_yaml::from_str(content).map_err(|source| SpecError::Parse {
      path: origin.to_path_buf(),
      source,
    })?;
    spec.validate()?;
    Ok(spec)
  }

  /// Load and validate a spec file.
  pub fn load(path: &Path) -> Result<Self, SpecError> {
    let content = std::fs::read_to_string(path).map_err(|source| SpecError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    let spec = Self::parse(&content, path)?;
    debug!(
      path = %path.display(),
      repositories = spec.repositories.len(),
      services = spec.services().count(),
      "loaded build spec"
    );
    Ok(spec)
  }

  pub fn validate(&self) -> Result<(), SpecError> {
    let mut seen = HashSet::new();
    for repo in &self.repositories {
      if repo.name.trim().is_empty() {
        return Err(SpecError::EmptyName);
      }
      if repo.source.trim().is_empty() {
        return Err(SpecError::EmptySource(repo.name.clone()));
      }
      if !seen.insert(repo.name.as_str()) {
        return Err(SpecError::DuplicateName(repo.name.clone()));
      }
    }
    Ok(())
  }

  pub fn services(&self) -> impl Iterator<Item = &Repository> {
    self.repositories.iter().filter(|repo| repo.is_service())
  }
}
