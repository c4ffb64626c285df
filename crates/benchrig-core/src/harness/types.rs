//! Stage inputs and the harness error type.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::StepError;
use crate::process::Output;
use crate::source::AcquireError;

/// Input to [`Harness::get`](super::Harness::get).
#[derive(Debug, Clone)]
pub struct GetSpec {
    /// Empty directory to populate with the pinned source tree.
    pub source_dir: PathBuf,
}

/// Input to [`Harness::build`](super::Harness::build).
///
/// All three directories are provisioned by the driver and owned by a
/// single in-flight build.
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Source tree fetched by `get`. Treated as read-only input.
    pub source_dir: PathBuf,
    /// Destination for runnable artifacts.
    pub bin_dir: PathBuf,
    /// Sources of the harness's benchmark driver.
    pub bench_dir: PathBuf,
}

/// Input to [`Harness::run`](super::Harness::run).
#[derive(Debug)]
pub struct RunSpec {
    /// Artifacts produced by `build`.
    pub bin_dir: PathBuf,
    /// Scratch directory shared by all variants, purged between them.
    pub tmp_dir: PathBuf,
    /// Base arguments passed to every variant before variant flags.
    pub args: Vec<String>,
    /// Run a reduced workload.
    pub short: bool,
    /// Destination for the benchmark driver's stdout and stderr.
    pub results: Output,
}

/// Errors surfaced by any harness stage.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The host cannot run this harness.
    #[error("{harness} cannot run on this host: {reason}")]
    PrerequisiteUnmet { harness: String, reason: String },

    /// Fetching the source tree failed.
    #[error("source acquisition failed")]
    Acquisition(#[from] AcquireError),

    /// A build step failed. `index` is 1-based.
    #[error("build step {index} ({name}) failed")]
    BuildStep {
        index: usize,
        name: String,
        #[source]
        source: StepError,
    },

    /// A benchmark variant failed.
    #[error("benchmark variant {variant} failed")]
    RunStep {
        variant: String,
        #[source]
        source: StepError,
    },
}

impl HarnessError {
    /// Whether this error means "skip this harness" rather than "broken".
    pub fn is_prerequisite_unmet(&self) -> bool {
        matches!(self, Self::PrerequisiteUnmet { .. })
    }
}
