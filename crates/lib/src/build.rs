//! Whole-release builds.
//!
//! A build loads the build spec, turns every repository into tasks, runs them as
//! one graph and writes the release manifest once the graph succeeded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::buildspec::{BuildSpec, SpecError};
use crate::consts::DEFAULT_RELEASE_FILENAME;
use crate::docker::{DockerAdapter, DockerError, RegistryClient};
use crate::git::GitCli;
use crate::graph::{GraphError, GraphOutput, Observer, Task, run_graph};
use crate::paths;
use crate::release::{Release, ReleaseError};
use crate::service::{BuildContext, ServicePlan, resolve_task, service_tasks};

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Spec(#[from] SpecError),

  #[error(transparent)]
  Docker(#[from] DockerError),

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Release(#[from] ReleaseError),
}

/// Settings for one build run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Root of all per-service working directories.
  pub base_dir: PathBuf,
  /// Overrides the build spec's `docker.repositoryPrefix`.
  pub registry_prefix: Option<String>,
  /// Tag-listing URL template containing `{repository}`.
  pub registry_url: Option<String>,
  pub push: bool,
  /// Defaults to `release.yml` beside the build spec.
  pub release_path: Option<PathBuf>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      base_dir: paths::cache_dir(),
      registry_prefix: None,
      registry_url: None,
      push: false,
      release_path: None,
    }
  }
}

impl BuildOptions {
  pub fn release_path_for(&self, spec_path: &Path) -> PathBuf {
    match &self.release_path {
      Some(path) => path.clone(),
      None => spec_path
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(DEFAULT_RELEASE_FILENAME),
    }
  }

  pub fn registry_prefix_for(&self, spec: &BuildSpec) -> String {
    self
      .registry_prefix
      .clone()
      .unwrap_or_else(|| spec.docker.repository_prefix.clone())
  }
}

/// Summary of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
  pub release: Release,
  pub release_path: PathBuf,
  pub completed: Vec<String>,
  pub skipped: Vec<String>,
}

/// Generate the full task list: a resolve task per repository, plus the
/// pipeline of every service.
pub fn generate_tasks(spec: &BuildSpec, ctx: &Arc<BuildContext>) -> Vec<Task> {
  let mut tasks = Vec::new();
  for repo in &spec.repositories {
    tasks.push(resolve_task(&repo.name, repo.source(), ctx.git.clone()));
    if repo.is_service() {
      let plan = ServicePlan::new(
        &ctx.base_dir,
        &repo.name,
        repo.source(),
        repo.has_docs(),
        repo.service.clone().unwrap_or_default(),
      );
      tasks.extend(service_tasks(plan, ctx));
    }
  }
  tasks
}

/// Run every task of `spec` and assemble the release from the result.
pub async fn build(
  spec: &BuildSpec,
  ctx: Arc<BuildContext>,
  observer: &dyn Observer,
) -> Result<(Release, GraphOutput), BuildError> {
  let tasks = generate_tasks(spec, &ctx);
  info!(
    repositories = spec.repositories.len(),
    tasks = tasks.len(),
    push = ctx.push,
    "starting build"
  );

  let output = run_graph(tasks, observer).await?;
  let release = Release::assemble(spec, &output.context)?;
  Ok((release, output))
}

/// Load the build spec at `spec_path`, build it against the local docker daemon and
/// the `git` binary, and write the release manifest.
pub async fn build_from_path(
  spec_path: &Path,
  options: &BuildOptions,
  observer: &dyn Observer,
) -> Result<BuildOutcome, BuildError> {
  let spec = BuildSpec::load(spec_path)?;

  let registry = match &options.registry_url {
    Some(url) => RegistryClient::new(url.clone()),
    None => RegistryClient::default(),
  };
  let docker = DockerAdapter::connect(&options.base_dir, registry)?;

  let ctx = Arc::new(BuildContext {
    base_dir: options.base_dir.clone(),
    registry_prefix: options.registry_prefix_for(&spec),
    push: options.push,
    docker: Arc::new(docker),
    git: Arc::new(GitCli::default()),
  });

  let (release, output) = build(&spec, ctx, observer).await?;
  let release_path = options.release_path_for(spec_path);
  release.write(&release_path)?;

  Ok(BuildOutcome {
    release,
    release_path,
    completed: output.completed,
    skipped: output.skipped,
  })
}
