//! Per-service build pipeline.
//!
//! Each service becomes a chain of tasks that clones the repository, runs
//! the buildpack inside the stack's build image, wraps the compiled app in a
//! final image and optionally pushes it. Every task that talks to the docker
//! daemon holds the `docker` lock.
//!
//! The image existence flags computed by Preflight are the only image cache
//! signal: when the target tag already exists locally or on the registry,
//! the buildpack steps report `Skipped` with their usual outputs. A stamp on
//! the app dir lets a re-run skip the buildpack steps when an earlier run
//! compiled the same source with the same buildpack and stack.

pub mod config;
pub mod dockerfile;
pub mod procfile;

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::DOCKER_LOCK;
use crate::docker::{ContainerOps, DockerError, RunSpec};
use crate::git::{GitError, SourceControl};
use crate::graph::{BoxError, InputError, Inputs, Outputs, Progress, Task, TaskOutcome, Value};
use crate::source::Source;
use crate::stamp::{self, StampError};

pub use config::{BuildConfig, BuildConfigOverride, BuildType, ConfigError, read_build_config};
pub use procfile::ProcfileError;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error("could not resolve {reference} at {url}")]
  UnresolvedRef { url: String, reference: String },

  #[error("{url} moved from {expected} to {actual} while building; re-run the build")]
  RevisionMoved {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("buildpack detect failed: application is not of the expected type (see {})", .log.display())]
  DetectFailed {
    log: PathBuf,
    #[source]
    source: DockerError,
  },

  #[error("buildpack compile failed (see {})", .log.display())]
  CompileFailed {
    log: PathBuf,
    #[source]
    source: DockerError,
  },

  #[error("Image {tag} already exists on the registry; not pushing")]
  AlreadyExists { tag: String },

  #[error(transparent)]
  Docker(#[from] DockerError),

  #[error(transparent)]
  Git(#[from] GitError),

  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Procfile(#[from] ProcfileError),

  #[error(transparent)]
  Stamp(#[from] StampError),

  #[error(transparent)]
  Input(#[from] InputError),

  #[error("failed to encode build config")]
  Encode(#[from] serde_json::Error),

  #[error("failed to {action} {}", .path.display())]
  Io {
    action: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("background work panicked")]
  Join(#[from] tokio::task::JoinError),
}

type StepResult = Result<TaskOutcome, PipelineError>;

/// Everything a build run's tasks share.
pub struct BuildContext {
  pub base_dir: PathBuf,
  /// Prepended to service names to form image repositories.
  pub registry_prefix: String,
  pub push: bool,
  pub docker: Arc<dyn ContainerOps>,
  pub git: Arc<dyn SourceControl>,
}

/// Context key holding a repository's pinned `url#revision`.
pub fn exact_source_key(name: &str) -> String {
  format!("repo-{name}-exact-source")
}

/// Context key for a service pipeline value.
pub fn service_key(name: &str, suffix: &str) -> String {
  format!("service-{name}-{suffix}")
}

/// A task that pins a repository's symbolic ref to a revision.
///
/// Provides `repo-<name>-exact-source`.
pub fn resolve_task(name: &str, source: Source, git: Arc<dyn SourceControl>) -> Task {
  let key = exact_source_key(name);
  let provided = key.clone();
  let repo = name.to_string();

  Task::new(format!("Repo {name} - Resolve Source"), move |_, progress: Progress| async move {
    let reference = source.reference_or_default().to_string();
    progress.step("Resolve Source");
    progress.message(format!("git ls-remote {} {}", source.url, reference));

    let revision = git
      .list_remote(&source.url, &reference)
      .await
      .map_err(PipelineError::from)?
      .ok_or_else(|| PipelineError::UnresolvedRef {
        url: source.url.clone(),
        reference: reference.clone(),
      })?;

    let exact = source.with_revision(&revision).to_string();
    info!(repo = %repo, reference = %reference, revision = %revision, "resolved source");
    Ok(TaskOutcome::Completed(Outputs::from([(key, Value::from(exact))])))
  })
  .provides([provided])
}

/// One service's pipeline settings and working layout.
#[derive(Debug, Clone)]
pub struct ServicePlan {
  pub name: String,
  pub source: Source,
  pub docs: bool,
  pub overrides: BuildConfigOverride,
  pub work_dir: PathBuf,
}

impl ServicePlan {
  pub fn new(base_dir: &Path, name: &str, source: Source, docs: bool, overrides: BuildConfigOverride) -> Self {
    Self {
      name: name.to_string(),
      source,
      docs,
      overrides,
      work_dir: base_dir.join(format!("service-{name}")),
    }
  }

  pub fn key(&self, suffix: &str) -> String {
    service_key(&self.name, suffix)
  }

  pub fn title(&self, step: &str) -> String {
    format!("Service {} - {}", self.name, step)
  }

  pub fn app_dir(&self) -> PathBuf {
    self.work_dir.join("app")
  }

  pub fn buildpack_dir(&self) -> PathBuf {
    self.work_dir.join("buildpack")
  }

  pub fn image_dir(&self) -> PathBuf {
    self.work_dir.join("image")
  }

  pub fn docs_dir(&self) -> PathBuf {
    self.work_dir.join("docs")
  }

  pub fn log_path(&self, name: &str) -> PathBuf {
    self.work_dir.join(name)
  }

  fn exact_key(&self) -> String {
    exact_source_key(&self.name)
  }

  /// Whether the target image is already available somewhere.
  fn image_cached(&self, inputs: &Inputs) -> Result<bool, InputError> {
    Ok(inputs.bool(&self.key("image-exists"))? || inputs.bool(&self.key("image-on-registry"))?)
  }

  /// Whether the buildpack steps can be skipped.
  fn compile_done(&self, inputs: &Inputs) -> Result<bool, InputError> {
    Ok(self.image_cached(inputs)? || inputs.bool(&self.key("compiled"))?)
  }

  fn outputs<const N: usize>(&self, pairs: [(&str, Value); N]) -> Outputs {
    pairs.into_iter().map(|(suffix, value)| (self.key(suffix), value)).collect()
  }
}

/// Sources a compiled app dir is stamped with.
pub fn stamp_sources(exact_source: &str, config: &BuildConfig) -> Vec<String> {
  vec![exact_source.to_string(), config.buildpack.clone(), config.stack.clone()]
}

fn step<F, Fut>(plan: &Arc<ServicePlan>, ctx: &Arc<BuildContext>, step_title: &'static str, body: F) -> Task
where
  F: FnOnce(Arc<ServicePlan>, Arc<BuildContext>, Inputs, Progress) -> Fut + Send + 'static,
  Fut: Future<Output = StepResult> + Send + 'static,
{
  let plan = plan.clone();
  let ctx = ctx.clone();
  Task::new(plan.title(step_title), move |inputs, progress: Progress| async move {
    progress.step(step_title);
    body(plan, ctx, inputs, progress).await.map_err(BoxError::from)
  })
}

/// Generate the task chain for one service.
pub fn service_tasks(plan: ServicePlan, ctx: &Arc<BuildContext>) -> Vec<Task> {
  let plan = Arc::new(plan);
  let k = |suffix: &str| plan.key(suffix);
  let exact = plan.exact_key();
  let flags = [k("image-exists"), k("image-on-registry")];

  let mut tasks = vec![
    step(&plan, ctx, "Preflight", preflight)
      .requires([exact.clone()])
      .provides([k("docker-image"), k("image-exists"), k("image-on-registry")])
      .locks([DOCKER_LOCK]),
    step(&plan, ctx, "Clone", clone_app)
      .requires([exact.clone()])
      .provides([k("app-dir")]),
    step(&plan, ctx, "Read Config", read_config)
      .requires([exact.clone(), k("app-dir")])
      .provides([k("build-config"), k("compiled")]),
    step(&plan, ctx, "Clone Buildpack", clone_buildpack)
      .requires([k("build-config"), k("compiled")])
      .requires(flags.clone())
      .provides([k("buildpack-dir")]),
    step(&plan, ctx, "Pull Build Image", pull_build_image)
      .requires([k("build-config"), k("compiled")])
      .requires(flags.clone())
      .provides([k("stack-image"), k("build-image")])
      .locks([DOCKER_LOCK]),
    step(&plan, ctx, "Detect", detect)
      .requires([k("app-dir"), k("buildpack-dir"), k("build-image"), k("compiled")])
      .requires(flags.clone())
      .provides([k("detected")])
      .locks([DOCKER_LOCK]),
    step(&plan, ctx, "Compile", compile)
      .requires([exact.clone(), k("app-dir"), k("build-config"), k("build-image"), k("detected"), k("compiled")])
      .requires(flags.clone())
      .provides([k("built-app-dir")])
      .locks([DOCKER_LOCK]),
    step(&plan, ctx, "Entrypoint", entrypoint)
      .requires([k("built-app-dir")])
      .requires(flags.clone())
      .provides([k("entrypoint")]),
    step(&plan, ctx, "Build Image", build_final_image)
      .requires([k("docker-image"), k("stack-image"), k("built-app-dir"), k("entrypoint")])
      .requires(flags.clone())
      .provides([k("image-built")])
      .locks([DOCKER_LOCK]),
  ];

  let mut cleanup_requires = vec![k("pushed")];
  if plan.docs {
    tasks.push(
      step(&plan, ctx, "Generate Docs", generate_docs)
        .requires([k("docker-image"), k("image-built")])
        .provides([k("docs-dir")])
        .locks([DOCKER_LOCK]),
    );
    cleanup_requires.push(k("docs-dir"));
  }

  tasks.push(
    step(&plan, ctx, "Push Image", push_image)
      .requires([k("docker-image"), k("image-built"), k("image-on-registry")])
      .provides([k("pushed")])
      .locks([DOCKER_LOCK]),
  );
  tasks.push(
    step(&plan, ctx, "Clean Up", cleanup)
      .requires(cleanup_requires)
      .provides([k("done")]),
  );

  tasks
}

async fn create_dir(path: &Path) -> Result<(), PipelineError> {
  tokio::fs::create_dir_all(path).await.map_err(|source| PipelineError::Io {
    action: "create",
    path: path.to_path_buf(),
    source,
  })
}

/// Remove a directory tree; a missing directory is fine.
async fn remove_dir(path: &Path) -> Result<(), PipelineError> {
  match tokio::fs::remove_dir_all(path).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(source) => Err(PipelineError::Io {
      action: "remove",
      path: path.to_path_buf(),
      source,
    }),
  }
}

fn revision_of(exact_source: &str) -> String {
  Source::parse(exact_source).reference_or_default().to_string()
}

async fn preflight(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  for dir in [plan.work_dir.clone(), plan.work_dir.join("cache"), plan.work_dir.join("env")] {
    create_dir(&dir).await?;
  }

  let revision = revision_of(inputs.string(&plan.exact_key())?);
  let tag = format!("{}{}:{}", ctx.registry_prefix, plan.name, revision);

  progress.message(format!("Checking for {tag}"));
  let exists = ctx.docker.image_exists(&tag).await?;
  progress.message(format!("Checking registry for {tag}"));
  let on_registry = ctx.docker.registry_has_tag(&tag).await?;

  info!(service = %plan.name, tag = %tag, exists, on_registry, "checked for existing image");
  Ok(TaskOutcome::Completed(plan.outputs([
    ("docker-image", Value::from(tag)),
    ("image-exists", Value::from(exists)),
    ("image-on-registry", Value::from(on_registry)),
  ])))
}

async fn clone_app(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let revision = revision_of(inputs.string(&plan.exact_key())?);
  let app_dir = plan.app_dir();
  let outputs = plan.outputs([("app-dir", Value::from(app_dir.clone()))]);

  if app_dir.join(".git").exists() {
    match ctx.git.rev_parse(&app_dir, "HEAD").await {
      Ok(head) if head == revision => {
        debug!(service = %plan.name, revision = %revision, "reusing checkout");
        return Ok(TaskOutcome::Skipped(outputs));
      }
      Ok(head) => debug!(service = %plan.name, head = %head, revision = %revision, "checkout is stale"),
      Err(e) => debug!(service = %plan.name, error = %e, "checkout is unreadable"),
    }
  }

  remove_dir(&app_dir).await?;
  create_dir(&plan.work_dir).await?;

  let reference = plan.source.reference_or_default();
  progress.message(format!("Cloning {}", plan.source.url));
  ctx.git.clone_shallow(&plan.source.url, Some(reference), &app_dir).await?;

  let head = ctx.git.rev_parse(&app_dir, "HEAD").await?;
  if head != revision {
    return Err(PipelineError::RevisionMoved {
      url: plan.source.url.clone(),
      expected: revision,
      actual: head,
    });
  }

  Ok(TaskOutcome::Completed(outputs))
}

async fn read_config(plan: Arc<ServicePlan>, _ctx: Arc<BuildContext>, inputs: Inputs, _progress: Progress) -> StepResult {
  let app_dir = inputs.path(&plan.key("app-dir"))?;
  let base = BuildConfig::default().merge(&plan.overrides);
  let config = read_build_config(app_dir, base)?;

  let exact = inputs.string(&plan.exact_key())?;
  let compiled = stamp::is_stamped(app_dir, &stamp_sources(exact, &config));

  info!(
    service = %plan.name,
    stack = %config.stack,
    buildpack = %config.buildpack,
    compiled,
    "read build config"
  );
  Ok(TaskOutcome::Completed(plan.outputs([
    ("build-config", Value::from(serde_json::to_value(&config)?)),
    ("compiled", Value::from(compiled)),
  ])))
}

async fn clone_buildpack(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let buildpack_dir = plan.buildpack_dir();
  let outputs = plan.outputs([("buildpack-dir", Value::from(buildpack_dir.clone()))]);
  if plan.compile_done(&inputs)? {
    return Ok(TaskOutcome::Skipped(outputs));
  }

  let config: BuildConfig = inputs.json(&plan.key("build-config"))?;
  let buildpack = Source::parse(&config.buildpack);

  remove_dir(&buildpack_dir).await?;
  progress.message(format!("Cloning {}", buildpack.url));
  ctx
    .git
    .clone_shallow(&buildpack.url, buildpack.reference.as_deref(), &buildpack_dir)
    .await?;

  Ok(TaskOutcome::Completed(outputs))
}

async fn pull_build_image(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let config: BuildConfig = inputs.json(&plan.key("build-config"))?;
  let stack_image = config.stack_image();
  let build_image = config.build_image();
  let outputs = plan.outputs([
    ("stack-image", Value::from(stack_image.clone())),
    ("build-image", Value::from(build_image.clone())),
  ]);
  if plan.compile_done(&inputs)? {
    return Ok(TaskOutcome::Skipped(outputs));
  }

  let local = ctx.docker.list_images().await?;
  let missing: Vec<&String> = [&stack_image, &build_image]
    .into_iter()
    .filter(|image| !local.contains(*image))
    .collect();
  if missing.is_empty() {
    debug!(service = %plan.name, "stack images already present");
    return Ok(TaskOutcome::Skipped(outputs));
  }

  for image in missing {
    ctx.docker.pull(image, &progress).await?;
  }
  Ok(TaskOutcome::Completed(outputs))
}

fn buildpack_run(plan: &ServicePlan, inputs: &Inputs, command: &[&str], log: &str) -> Result<RunSpec, InputError> {
  let app_dir = inputs.path(&plan.key("app-dir"))?;
  Ok(RunSpec {
    image: inputs.string(&plan.key("build-image"))?.to_string(),
    command: command.iter().map(|s| s.to_string()).collect(),
    env: BTreeMap::new(),
    work_dir: plan.work_dir.clone(),
    binds: vec![format!("{}:/app", app_dir.display())],
    logfile: plan.log_path(log),
  })
}

async fn detect(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let outputs = plan.outputs([("detected", Value::from(true))]);
  if plan.compile_done(&inputs)? {
    return Ok(TaskOutcome::Skipped(outputs));
  }

  let spec = buildpack_run(&plan, &inputs, &["/workdir/buildpack/bin/detect", "/app"], "detect.log")?;
  match ctx.docker.run(&spec, &progress).await {
    Ok(()) => Ok(TaskOutcome::Completed(outputs)),
    Err(source @ DockerError::ContainerExit { .. }) => Err(PipelineError::DetectFailed {
      log: spec.logfile.clone(),
      source,
    }),
    Err(e) => Err(e.into()),
  }
}

async fn compile(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let app_dir = inputs.path(&plan.key("app-dir"))?.to_path_buf();
  let outputs = plan.outputs([("built-app-dir", Value::from(app_dir.clone()))]);
  if plan.compile_done(&inputs)? {
    return Ok(TaskOutcome::Skipped(outputs));
  }

  let spec = buildpack_run(
    &plan,
    &inputs,
    &["/workdir/buildpack/bin/compile", "/app", "/workdir/cache", "/workdir/env"],
    "compile.log",
  )?;
  match ctx.docker.run(&spec, &progress).await {
    Ok(()) => {}
    Err(source @ DockerError::ContainerExit { .. }) => {
      return Err(PipelineError::CompileFailed {
        log: spec.logfile.clone(),
        source,
      });
    }
    Err(e) => return Err(e.into()),
  }

  let config: BuildConfig = inputs.json(&plan.key("build-config"))?;
  stamp::write_stamp(&app_dir, &stamp_sources(inputs.string(&plan.exact_key())?, &config))?;
  Ok(TaskOutcome::Completed(outputs))
}

async fn entrypoint(plan: Arc<ServicePlan>, _ctx: Arc<BuildContext>, inputs: Inputs, _progress: Progress) -> StepResult {
  let app_dir = inputs.path(&plan.key("built-app-dir"))?.to_path_buf();
  let path = app_dir.join(crate::consts::ENTRYPOINT_FILENAME);
  let outputs = plan.outputs([("entrypoint", Value::from(path))]);
  if plan.image_cached(&inputs)? {
    return Ok(TaskOutcome::Skipped(outputs));
  }

  procfile::write_entrypoint(&app_dir)?;
  Ok(TaskOutcome::Completed(outputs))
}

async fn build_final_image(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let tag = inputs.string(&plan.key("docker-image"))?.to_string();
  let outputs = plan.outputs([("image-built", Value::from(true))]);

  if inputs.bool(&plan.key("image-exists"))? {
    return Ok(TaskOutcome::Skipped(outputs));
  }
  if inputs.bool(&plan.key("image-on-registry"))? {
    info!(service = %plan.name, tag = %tag, "pulling existing image from registry");
    ctx.docker.pull(&tag, &progress).await?;
    return Ok(TaskOutcome::Skipped(outputs));
  }

  let stack_image = inputs.string(&plan.key("stack-image"))?.to_string();
  let app_dir = inputs.path(&plan.key("built-app-dir"))?.to_path_buf();
  let work_dir = plan.work_dir.clone();

  progress.message("Packing build context");
  let context = tokio::task::spawn_blocking(move || dockerfile::build_context(&work_dir, &app_dir, &stack_image))
    .await?
    .map_err(|source| PipelineError::Io {
      action: "pack build context for",
      path: plan.image_dir(),
      source,
    })?;

  ctx
    .docker
    .build(&tag, context, &plan.log_path("docker-build.log"), &progress)
    .await?;
  info!(service = %plan.name, tag = %tag, "built image");
  Ok(TaskOutcome::Completed(outputs))
}

async fn generate_docs(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let docs_dir = plan.docs_dir();
  remove_dir(&docs_dir).await?;

  let spec = RunSpec {
    image: inputs.string(&plan.key("docker-image"))?.to_string(),
    command: vec!["write-docs".to_string()],
    env: BTreeMap::from([("DOCS_OUTPUT_DIR".to_string(), "/workdir/docs".to_string())]),
    work_dir: plan.work_dir.clone(),
    binds: Vec::new(),
    logfile: plan.log_path("generate-docs.log"),
  };
  ctx.docker.run(&spec, &progress).await?;

  Ok(TaskOutcome::Completed(
    plan.outputs([("docs-dir", Value::from(docs_dir))]),
  ))
}

async fn push_image(plan: Arc<ServicePlan>, ctx: Arc<BuildContext>, inputs: Inputs, progress: Progress) -> StepResult {
  let tag = inputs.string(&plan.key("docker-image"))?.to_string();
  if !ctx.push {
    return Ok(TaskOutcome::Skipped(plan.outputs([("pushed", Value::from(false))])));
  }
  if inputs.bool(&plan.key("image-on-registry"))? {
    return Err(PipelineError::AlreadyExists { tag });
  }

  ctx
    .docker
    .push(&tag, &plan.log_path("docker-push.log"), &progress)
    .await?;
  info!(service = %plan.name, tag = %tag, "pushed image");
  Ok(TaskOutcome::Completed(plan.outputs([("pushed", Value::from(true))])))
}

async fn cleanup(plan: Arc<ServicePlan>, _ctx: Arc<BuildContext>, _inputs: Inputs, _progress: Progress) -> StepResult {
  for dir in [plan.app_dir(), plan.buildpack_dir(), plan.image_dir()] {
    remove_dir(&dir).await?;
  }
  debug!(service = %plan.name, "removed working trees");
  Ok(TaskOutcome::Completed(plan.outputs([("done", Value::from(true))])))
}
