mod cmd;
mod output;
mod status;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dockyard_lib::BuildOptions;
use dockyard_lib::paths;

use crate::cmd::cmd_build;
use crate::output::print_error_chain;

/// dockyard - build buildpack service images and assemble a release
#[derive(Parser)]
#[command(name = "dockyard")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every service of a build spec and write the release manifest
  Build {
    /// Path to the build spec (YAML)
    spec: PathBuf,

    /// Directory holding per-service working trees (default: ~/.cache/dockyard)
    #[arg(long, env = "DOCKYARD_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Where to write the release manifest (default: release.yml beside the build spec)
    #[arg(long)]
    release: Option<PathBuf>,

    /// Image repository prefix, overriding the build spec's docker.repositoryPrefix
    #[arg(long, env = "DOCKYARD_REGISTRY_PREFIX")]
    registry_prefix: Option<String>,

    /// Tag-listing URL template containing {repository}
    #[arg(long, env = "DOCKYARD_REGISTRY_URL")]
    registry_url: Option<String>,

    /// Push built images to the registry
    #[arg(long, env = "DOCKYARD_PUSH")]
    push: bool,
  },
}

fn init_tracing(verbose: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    if verbose {
      EnvFilter::new("dockyard=debug,dockyard_lib=debug,dockyard_cli=debug")
    } else {
      EnvFilter::new("warn")
    }
  });

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let result = match cli.command {
    Commands::Build {
      spec,
      base_dir,
      release,
      registry_prefix,
      registry_url,
      push,
    } => cmd_build(
      &spec,
      BuildOptions {
        base_dir: base_dir.unwrap_or_else(paths::cache_dir),
        registry_prefix,
        registry_url,
        push,
        release_path: release,
      },
    ),
  };

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      print_error_chain(&err);
      ExitCode::FAILURE
    }
  }
}
