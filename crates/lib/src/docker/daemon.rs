//! [`ContainerOps`] backed by the local docker daemon.
//!
//! Pull, build, list and run go through the daemon API. Push shells out to
//! `docker push` so the user's configured registry credentials apply.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
  Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::progress::{BuildProgress, ByteCounts, PullEvent, PullProgress};
use super::registry::RegistryClient;
use super::{ContainerOps, DockerError, ImageRef, RunSpec};
use crate::graph::Progress;

const PASSWD_FILE: &str = "passwd";
const GROUP_FILE: &str = "group";

/// Daemon client plus the per-run settings every container shares.
pub struct DockerAdapter {
  docker: Docker,
  registry: RegistryClient,
  base_dir: PathBuf,
  user: String,
}

impl DockerAdapter {
  /// Connect to the local daemon and prepare the user mapping files in
  /// `base_dir`.
  pub fn connect(base_dir: &Path, registry: RegistryClient) -> Result<Self, DockerError> {
    let docker = Docker::connect_with_local_defaults().map_err(DockerError::Connect)?;
    let (uid, gid) = current_ids();
    std::fs::create_dir_all(base_dir)?;
    write_user_files(base_dir, uid, gid)?;
    info!(base_dir = %base_dir.display(), uid, gid, "connected to docker");

    Ok(Self {
      docker,
      registry,
      base_dir: base_dir.to_path_buf(),
      user: format!("{uid}:{gid}"),
    })
  }

  async fn remove(&self, id: &str) {
    let options = RemoveContainerOptions {
      force: true,
      ..Default::default()
    };
    if let Err(e) = self.docker.remove_container(id, Some(options)).await {
      warn!(container = %id, error = %e, "failed to remove container");
    }
  }
}

#[cfg(unix)]
fn current_ids() -> (u32, u32) {
  (
    rustix::process::getuid().as_raw(),
    rustix::process::getgid().as_raw(),
  )
}

#[cfg(not(unix))]
fn current_ids() -> (u32, u32) {
  (0, 0)
}

/// Write `passwd` and `group` files naming the invoking uid/gid `builder`.
pub fn write_user_files(dir: &Path, uid: u32, gid: u32) -> std::io::Result<()> {
  std::fs::write(
    dir.join(PASSWD_FILE),
    format!("root:x:0:0:root:/root:/bin/bash\nbuilder:x:{uid}:{gid}:builder:/:/bin/bash\n"),
  )?;
  std::fs::write(dir.join(GROUP_FILE), format!("root:x:0:\nbuilder:x:{gid}:\n"))?;
  Ok(())
}

/// Bind mounts for a run: user files, the work dir, then any extras.
pub fn container_binds(base_dir: &Path, spec: &RunSpec) -> Vec<String> {
  let mut binds = vec![
    format!("{}:/etc/passwd:ro", base_dir.join(PASSWD_FILE).display()),
    format!("{}:/etc/group:ro", base_dir.join(GROUP_FILE).display()),
    format!("{}:/workdir", spec.work_dir.display()),
  ];
  binds.extend(spec.binds.iter().cloned());
  binds
}

/// Run `command`, copying each stdout/stderr line into `logfile` and
/// reporting it as a progress message.
pub async fn tee_command(mut command: Command, logfile: &Path, progress: &Progress) -> Result<ExitStatus, DockerError> {
  let program = command.as_std().get_program().to_string_lossy().into_owned();
  command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

  let mut child = command.spawn().map_err(|source| DockerError::Spawn { program, source })?;
  let mut log = File::create(logfile).await?;

  let mut out = child.stdout.take().map(|s| BufReader::new(s).lines());
  let mut err = child.stderr.take().map(|s| BufReader::new(s).lines());

  loop {
    let line = tokio::select! {
      line = async { out.as_mut()?.next_line().await.transpose() }, if out.is_some() => {
        if line.is_none() { out = None; }
        line
      }
      line = async { err.as_mut()?.next_line().await.transpose() }, if err.is_some() => {
        if line.is_none() { err = None; }
        line
      }
      else => break,
    };

    if let Some(line) = line {
      let line = line?;
      log.write_all(line.as_bytes()).await?;
      log.write_all(b"\n").await?;
      progress.message(line);
    }
  }

  log.flush().await?;
  Ok(child.wait().await?)
}

#[async_trait]
impl ContainerOps for DockerAdapter {
  async fn pull(&self, image: &str, progress: &Progress) -> Result<(), DockerError> {
    let image_ref = ImageRef::parse(image);
    info!(image = %image, "pulling image");
    progress.message(format!("docker pull {image}"));

    let options = CreateImageOptions {
      from_image: image_ref.repository,
      tag: image_ref.tag,
      ..Default::default()
    };
    let mut stream = self.docker.create_image(Some(options), None, None);
    let mut tracker = PullProgress::new();

    while let Some(item) = stream.next().await {
      let info = item.map_err(|e| DockerError::PullFailed {
        image: image.to_string(),
        message: e.to_string(),
      })?;
      if let Some(message) = info.error {
        return Err(DockerError::PullFailed {
          image: image.to_string(),
          message,
        });
      }

      let event = PullEvent {
        id: info.id,
        status: info.status,
        detail: info.progress_detail.map(|detail| ByteCounts {
          current: detail.current.and_then(|c| u64::try_from(c).ok()),
          total: detail.total.and_then(|t| u64::try_from(t).ok()),
        }),
      };
      if let Some(pct) = tracker.update(&event) {
        progress.percent(pct);
      }
    }

    debug!(image = %image, "pull complete");
    Ok(())
  }

  async fn run(&self, spec: &RunSpec, progress: &Progress) -> Result<(), DockerError> {
    info!(image = %spec.image, command = ?spec.command, "running container");

    let config = Config {
      image: Some(spec.image.clone()),
      cmd: Some(spec.command.clone()),
      env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
      user: Some(self.user.clone()),
      attach_stdout: Some(true),
      attach_stderr: Some(true),
      host_config: Some(HostConfig {
        binds: Some(container_binds(&self.base_dir, spec)),
        ..Default::default()
      }),
      ..Default::default()
    };

    let created = self
      .docker
      .create_container(None::<CreateContainerOptions<String>>, config)
      .await
      .map_err(|source| DockerError::Daemon {
        op: "create container",
        source,
      })?;
    let id = created.id;

    let result = async {
      self
        .docker
        .start_container(&id, None::<StartContainerOptions<String>>)
        .await
        .map_err(|source| DockerError::Daemon {
          op: "start container",
          source,
        })?;

      let mut log = File::create(&spec.logfile).await?;
      let mut logs = self.docker.logs(
        &id,
        Some(LogsOptions::<String> {
          follow: true,
          stdout: true,
          stderr: true,
          ..Default::default()
        }),
      );
      while let Some(chunk) = logs.next().await {
        let chunk = chunk.map_err(|source| DockerError::Daemon { op: "logs", source })?;
        let bytes = chunk.into_bytes();
        log.write_all(&bytes).await?;
        if let Some(line) = String::from_utf8_lossy(&bytes).lines().rev().find(|l| !l.trim().is_empty()) {
          progress.message(line.trim());
        }
      }
      log.flush().await?;

      let mut wait = self.docker.wait_container(&id, None::<WaitContainerOptions<String>>);
      let code = match wait.next().await {
        Some(Ok(response)) => response.status_code,
        Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => code,
        Some(Err(source)) => return Err(DockerError::Daemon { op: "wait", source }),
        None => 0,
      };
      Ok::<i64, DockerError>(code)
    }
    .await;

    self.remove(&id).await;

    let code = result?;
    if code != 0 {
      return Err(DockerError::ContainerExit {
        image: spec.image.clone(),
        code,
        log: spec.logfile.clone(),
      });
    }
    Ok(())
  }

  async fn build(&self, tag: &str, context: Vec<u8>, logfile: &Path, progress: &Progress) -> Result<(), DockerError> {
    info!(tag = %tag, context_bytes = context.len(), "building image");
    progress.percent(0.0);
    progress.message(format!("Building {tag}"));

    let options = BuildImageOptions::<String> {
      t: tag.to_string(),
      rm: true,
      ..Default::default()
    };
    let mut stream = self.docker.build_image(options, None, Some(context.into()));
    let mut log = File::create(logfile).await?;
    let mut steps = BuildProgress::new();

    let failed = |message: String| DockerError::BuildFailed {
      tag: tag.to_string(),
      log: logfile.to_path_buf(),
      message,
    };

    while let Some(item) = stream.next().await {
      let info = match item {
        Ok(info) => info,
        Err(bollard::errors::Error::DockerStreamError { error }) => {
          log.write_all(error.as_bytes()).await?;
          return Err(failed(error));
        }
        Err(source) => return Err(DockerError::Daemon { op: "build", source }),
      };

      if let Some(error) = info.error {
        log.write_all(error.as_bytes()).await?;
        log.flush().await?;
        return Err(failed(error));
      }

      if let Some(text) = info.stream {
        log.write_all(text.as_bytes()).await?;
        for line in text.lines() {
          if let Some(pct) = steps.observe(line) {
            progress.percent(pct);
          }
          if !line.trim().is_empty() {
            progress.message(line.trim());
          }
        }
      }
    }

    log.flush().await?;
    progress.percent(100.0);
    Ok(())
  }

  async fn push(&self, tag: &str, logfile: &Path, progress: &Progress) -> Result<(), DockerError> {
    info!(tag = %tag, "pushing image");
    let mut command = Command::new("docker");
    command.args(["push", tag]);

    let status = tee_command(command, logfile, progress).await?;
    if !status.success() {
      return Err(DockerError::PushFailed {
        tag: tag.to_string(),
        log: logfile.to_path_buf(),
      });
    }
    Ok(())
  }

  async fn list_images(&self) -> Result<Vec<String>, DockerError> {
    let images = self
      .docker
      .list_images(Some(ListImagesOptions::<String>::default()))
      .await
      .map_err(|source| DockerError::Daemon {
        op: "list images",
        source,
      })?;

    Ok(
      images
        .into_iter()
        .flat_map(|image| image.repo_tags)
        .filter(|tag| tag != "<none>:<none>")
        .collect(),
    )
  }

  async fn registry_has_tag(&self, tag: &str) -> Result<bool, DockerError> {
    self.registry.has_tag(tag).await
  }
}
