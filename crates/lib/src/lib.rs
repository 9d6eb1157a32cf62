//! dockyard-lib: buildpack image builds driven by a task graph
//!
//! This crate provides the pieces behind `dockyard build`:
//! - `graph`: named tasks with requires/provides/locks, run concurrently
//! - `service`: the per-service buildpack pipeline expressed as tasks
//! - `docker`: container daemon and registry operations
//! - `stamp`: fingerprints that let re-runs skip finished work
//! - `buildspec` / `release`: the YAML documents going in and coming out

pub mod build;
pub mod buildspec;
pub mod consts;
pub mod docker;
pub mod git;
pub mod graph;
pub mod paths;
pub mod release;
pub mod service;
pub mod source;
pub mod stamp;

#[cfg(test)]
pub(crate) mod testutil;

pub use build::{BuildError, BuildOptions, BuildOutcome, build, build_from_path, generate_tasks};
pub use buildspec::{BuildSpec, Repository, RepositoryKind};
pub use release::Release;
