//! Implementation of the `dockyard build` command.
//!
//! Builds every service of a build spec and writes the release manifest.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use dockyard_lib::BuildOptions;

use crate::output::{format_duration, print_info, print_stat, print_success};
use crate::status::StatusObserver;

/// Execute the build command.
///
/// Prints a summary with task counts and the release path on success.
pub fn cmd_build(spec: &Path, options: BuildOptions) -> Result<()> {
  print_info(&format!("Building {}", spec.display()));
  let started = Instant::now();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let observer = StatusObserver::new();
  let result = rt.block_on(dockyard_lib::build_from_path(spec, &options, &observer));
  observer.finish();
  let outcome = result.context("Build failed")?;

  println!();
  print_success(&format!("Build complete in {}", format_duration(started.elapsed())));
  print_stat("Tasks completed", &outcome.completed.len().to_string());
  print_stat("Tasks skipped", &outcome.skipped.len().to_string());
  print_stat("Repositories", &outcome.release.repositories.len().to_string());
  print_stat("Release", &outcome.release_path.display().to_string());

  info!(path = %outcome.release_path.display(), "release written");
  Ok(())
}
