//! The `Harness` trait -- the lifecycle contract for benchmarked projects.
//!
//! Each concrete harness (CockroachDB, ...) implements this trait. The trait
//! is intentionally object-safe so it can be stored as `Box<dyn Harness>` in
//! the [`super::HarnessRegistry`].

use async_trait::async_trait;

use super::types::{BuildSpec, GetSpec, HarnessError, RunSpec};
use crate::config::Config;

/// Fetch/build/run recipe for one benchmarked project.
///
/// The driver calls the four stages strictly in order and never
/// concurrently for the same harness. Every process must be launched
/// through [`Config::runner`].
#[async_trait]
pub trait Harness: Send + Sync {
    /// Stable name (e.g. "cockroachdb"). Used as the registry key and to
    /// namespace the harness's directories.
    fn name(&self) -> &str;

    /// Check that this host can run the harness at all.
    ///
    /// Must not touch the filesystem or launch processes. Returns
    /// [`HarnessError::PrerequisiteUnmet`] with a descriptive reason.
    fn check_prerequisites(&self) -> Result<(), HarnessError>;

    /// Populate `spec.source_dir` with the pinned source tree, including
    /// any nested sources the build needs.
    async fn get(&self, cfg: &Config, spec: &GetSpec) -> Result<(), HarnessError>;

    /// Build runnable artifacts into `spec.bin_dir`.
    ///
    /// Artifact names are contractual: rename tool output where needed.
    /// Transient build workspaces must be cleaned up on every exit path.
    async fn build(&self, cfg: &Config, spec: &BuildSpec) -> Result<(), HarnessError>;

    /// Run every benchmark variant, writing output to `spec.results`.
    ///
    /// `spec.tmp_dir` is purged after each variant. Stops at the first
    /// failing variant.
    async fn run(&self, cfg: &Config, spec: &RunSpec) -> Result<(), HarnessError>;
}

// Compile-time assertion: Harness must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Harness) {}
};
