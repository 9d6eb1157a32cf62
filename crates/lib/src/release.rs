//! Release manifest assembly.
//!
//! After a successful build, each repository of the build spec is written out
//! again together with the exact source revision that was built and, for
//! services, the image tag.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::buildspec::{BuildSpec, RepositoryKind};
use crate::graph::{Context, Value};
use crate::service::{exact_source_key, service_key};

#[derive(Debug, Error)]
pub enum ReleaseError {
  #[error("build produced no '{key}' for repository '{name}'")]
  MissingValue { name: String, key: String },

  #[error("'{key}' is not a string")]
  WrongType { key: String },

  #[error("failed to encode release manifest")]
  Encode(#[from] serde_yaml::Error),

  #[error("failed to write release manifest {}", .path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEntry {
  pub name: String,
  pub source: String,
  pub kind: RepositoryKind,
  /// `url#revision` as resolved at the start of the build.
  pub exact_source: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub docker_image: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Release {
  pub repositories: Vec<ReleaseEntry>,
}

fn context_string(context: &Context, name: &str, key: String) -> Result<String, ReleaseError> {
  match context.get(&key) {
    Some(Value::String(value)) => Ok(value.clone()),
    Some(_) => Err(ReleaseError::WrongType { key }),
    None => Err(ReleaseError::MissingValue {
      name: name.to_string(),
      key,
    }),
  }
}

impl Release {
  /// Build the manifest from the build spec and a finished run's context.
  pub fn assemble(spec: &BuildSpec, context: &Context) -> Result<Self, ReleaseError> {
    let repositories = spec
      .repositories
      .iter()
      .map(|repo| {
        let exact_source = context_string(context, &repo.name, exact_source_key(&repo.name))?;
        let docker_image = if repo.is_service() {
          Some(context_string(context, &repo.name, service_key(&repo.name, "docker-image"))?)
        } else {
          None
        };
        Ok(ReleaseEntry {
          name: repo.name.clone(),
          source: repo.source.clone(),
          kind: repo.kind,
          exact_source,
          docker_image,
        })
      })
      .collect::<Result<Vec<_>, ReleaseError>>()?;
    Ok(Self { repositories })
  }

  pub fn to_yaml(&self) -> Result<String, ReleaseError> {
    Ok(serde_yaml::to_string(self)?)
  }

  /// Write the manifest as YAML, creating parent directories.
  pub fn write(&self, path: &Path) -> Result<(), ReleaseError> {
    let content = self.to_yaml()?;
    let io_err = |source| ReleaseError::Write {
      path: path.to_path_buf(),
      source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, content).map_err(io_err)?;
    info!(path = %path.display(), repositories = self.repositories.len(), "wrote release manifest");
    Ok(())
  }
}
