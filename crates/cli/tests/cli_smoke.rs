//! CLI smoke tests for dockyard.
//!
//! These cover argument handling and the failures that happen before the
//! docker daemon is contacted, so they run without docker or network.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the dockyard binary.
fn dockyard_cmd() -> Command {
  cargo_bin_cmd!("dockyard")
}

/// Create a temp directory holding `build.yml` with the given content.
fn temp_spec(content: &str) -> TempDir {
  let temp = TempDir::new().unwrap();
  std::fs::write(temp.path().join("build.yml"), content).unwrap();
  temp
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  dockyard_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"))
    .stdout(predicate::str::contains("build"));
}

#[test]
fn version_flag_works() {
  dockyard_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("dockyard"));
}

#[test]
fn build_help_lists_options() {
  dockyard_cmd()
    .args(["build", "--help"])
    .assert()
    .success()
    .stdout(predicate::str::contains("--registry-prefix"))
    .stdout(predicate::str::contains("--push"));
}

#[test]
fn deploy_is_not_a_command() {
  dockyard_cmd().arg("deploy").assert().failure();
}

#[test]
fn build_requires_a_spec() {
  dockyard_cmd().arg("build").assert().failure();
}

// =============================================================================
// build
// =============================================================================

#[test]
fn build_missing_spec_fails() {
  let temp = TempDir::new().unwrap();

  dockyard_cmd()
    .arg("build")
    .arg(temp.path().join("missing.yml"))
    .env("DOCKYARD_BASE_DIR", temp.path().join("base"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("error: "))
    .stderr(predicate::str::contains("failed to read build spec"));

  assert!(!temp.path().join("base").exists());
}

#[test]
fn build_rejects_duplicate_repository_names() {
  let temp = temp_spec(
    "repositories:\n  - {name: svc, source: 'https://example.test/a#main', kind: service}\n  - {name: svc, source: 'https://example.test/b'}\n",
  );

  dockyard_cmd()
    .arg("build")
    .arg(temp.path().join("build.yml"))
    .env("DOCKYARD_BASE_DIR", temp.path().join("base"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("'svc' is listed more than once"));

  assert!(!temp.path().join("release.yml").exists());
}

#[test]
fn build_rejects_malformed_spec() {
  let temp = temp_spec("repositories: {not: a list}\n");

  dockyard_cmd()
    .arg("build")
    .arg(temp.path().join("build.yml"))
    .env("DOCKYARD_BASE_DIR", temp.path().join("base"))
    .assert()
    .code(1)
    .stderr(predicate::str::contains("invalid build spec"));
}
