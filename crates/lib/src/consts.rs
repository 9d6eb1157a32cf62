//! Shared names and defaults.

pub const APP_NAME: &str = "dockyard";

/// Lock held by every task that talks to the docker daemon.
pub const DOCKER_LOCK: &str = "docker";

/// File name of the per-directory build stamp.
pub const STAMP_FILENAME: &str = ".dockyard-stamp";

/// Optional per-repository build configuration file.
pub const BUILD_CONFIG_FILENAME: &str = ".build-config.yml";

pub const PROCFILE_FILENAME: &str = "Procfile";

/// Entrypoint script written into the app dir.
pub const ENTRYPOINT_FILENAME: &str = "entrypoint";

pub const DEFAULT_REGISTRY_URL: &str = "https://index.docker.io/v1/repositories/{repository}/tags";

/// Release manifest written beside the build spec when no path is given.
pub const DEFAULT_RELEASE_FILENAME: &str = "release.yml";

/// Ref used when a source URL has no `#ref`.
pub const DEFAULT_SOURCE_REF: &str = "master";

pub const DEFAULT_STACK: &str = "heroku-16";

pub const DEFAULT_BUILDPACK: &str = "https://github.com/heroku/heroku-buildpack-nodejs";
