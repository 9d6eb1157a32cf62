//! Per-service build configuration.
//!
//! Defaults are overridden first by the build spec's `service` block, then by
//! a `.build-config.yml` in the repository root. Each layer replaces whole
//! fields; nothing is merged below the top level.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{BUILD_CONFIG_FILENAME, DEFAULT_BUILDPACK, DEFAULT_STACK};

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {}", .path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid build config in {}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildType {
  #[default]
  HerokuBuildpack,
}

/// Resolved build configuration for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
  pub build_type: BuildType,
  pub stack: String,
  /// Buildpack repository as `url[#ref]`.
  pub buildpack: String,
}

impl Default for BuildConfig {
  fn default() -> Self {
    Self {
      build_type: BuildType::HerokuBuildpack,
      stack: DEFAULT_STACK.to_string(),
      buildpack: DEFAULT_BUILDPACK.to_string(),
    }
  }
}

/// A partial [`BuildConfig`]; set fields replace the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BuildConfigOverride {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub build_type: Option<BuildType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stack: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub buildpack: Option<String>,
}

impl BuildConfig {
  pub fn merge(mut self, overrides: &BuildConfigOverride) -> Self {
    if let Some(build_type) = overrides.build_type {
      self.build_type = build_type;
    }
    if let Some(stack) = &overrides.stack {
      self.stack = stack.clone();
    }
    if let Some(buildpack) = &overrides.buildpack {
      self.buildpack = buildpack.clone();
    }
    self
  }

  /// Runtime image for the stack: `heroku-16` becomes `heroku/heroku:16`.
  pub fn stack_image(&self) -> String {
    format!("heroku/{}", self.stack.replacen('-', ":", 1))
  }

  /// Image the buildpack runs in, e.g. `heroku/heroku:16-build`.
  pub fn build_image(&self) -> String {
    format!("{}-build", self.stack_image())
  }
}

/// Apply `.build-config.yml` from `app_dir`, if present, on top of `base`.
pub fn read_build_config(app_dir: &Path, base: BuildConfig) -> Result<BuildConfig, ConfigError> {
  let path = app_dir.join(BUILD_CONFIG_FILENAME);
  let content = match std::fs::read_to_string(&path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!(path = %path.display(), "no build config file");
      return Ok(base);
    }
    Err(source) => return Err(ConfigError::Read { path, source }),
  };

  if content.trim().is_empty() {
    return Ok(base);
  }

  let overrides: BuildConfigOverride =
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
  debug!(path = %path.display(), ?overrides, "applying build config file");
  Ok(base.merge(&overrides))
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn defaults_and_image_names() {
    let config = BuildConfig::default();
    assert_eq!(config.build_type, BuildType::HerokuBuildpack);
    assert_eq!(config.stack_image(), "heroku/heroku:16");
    assert_eq!(config.build_image(), "heroku/heroku:16-build");
  }

  #[test]
  fn only_first_dash_becomes_colon() {
    let config = BuildConfig {
      stack: "heroku-18-beta".to_string(),
      ..Default::default()
    };
    assert_eq!(config.stack_image(), "heroku/heroku:18-beta");
  }

  #[test]
  fn missing_file_keeps_base() {
    let temp = TempDir::new().unwrap();
    let config = read_build_config(temp.path(), BuildConfig::default()).unwrap();
    assert_eq!(config, BuildConfig::default());
  }

  #[test]
  fn empty_file_keeps_base() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(BUILD_CONFIG_FILENAME), "\n").unwrap();
    let config = read_build_config(temp.path(), BuildConfig::default()).unwrap();
    assert_eq!(config, BuildConfig::default());
  }

  #[test]
  fn file_overrides_only_named_fields() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(BUILD_CONFIG_FILENAME), "stack: heroku-18\n").unwrap();

    let config = read_build_config(temp.path(), BuildConfig::default()).unwrap();
    assert_eq!(config.stack, "heroku-18");
    assert_eq!(config.buildpack, DEFAULT_BUILDPACK);
  }

  #[test]
  fn file_wins_over_spec_overrides() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(BUILD_CONFIG_FILENAME), "buildpack: https://example.test/bp#v2\n").unwrap();

    let base = BuildConfig::default().merge(&BuildConfigOverride {
      buildpack: Some("https://example.test/bp#v1".to_string()),
      stack: Some("heroku-18".to_string()),
      ..Default::default()
    });
    let config = read_build_config(temp.path(), base).unwrap();
    assert_eq!(config.buildpack, "https://example.test/bp#v2");
    assert_eq!(config.stack, "heroku-18");
  }

  #[test]
  fn unknown_keys_are_rejected() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(BUILD_CONFIG_FILENAME), "stak: heroku-18\n").unwrap();
    let err = read_build_config(temp.path(), BuildConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
  }

  #[test]
  fn only_buildpack_builds_are_supported() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join(BUILD_CONFIG_FILENAME), "buildType: tools-ui\n").unwrap();
    let err = read_build_config(temp.path(), BuildConfig::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));

    let explicit: BuildConfigOverride = serde_yaml::from_str("buildType: heroku-buildpack\n").unwrap();
    assert_eq!(explicit.build_type, Some(BuildType::HerokuBuildpack));
  }

  #[test]
  fn config_round_trips_through_json() {
    let value = serde_json::to_value(BuildConfig::default()).unwrap();
    assert_eq!(value["buildType"], "heroku-buildpack");
    let back: BuildConfig = serde_json::from_value(value).unwrap();
    assert_eq!(back, BuildConfig::default());
  }
}
