//! Suite driver: sequences harness lifecycles.
//!
//! The driver owns everything the harness contract leaves to the caller:
//! provisioning per-harness directories, applying the prerequisite policy,
//! opening the results file, and optionally bounding each stage with a
//! wall-clock limit.
//!
//! ```text
//! <work_dir>/<name>/src     GetSpec.source_dir, BuildSpec.source_dir
//! <work_dir>/<name>/bin     BuildSpec.bin_dir, RunSpec.bin_dir
//! <work_dir>/<name>/tmp     RunSpec.tmp_dir
//! <bench_root>/<name>       BuildSpec.bench_dir
//! <results_dir>/<name>.results
//! ```

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::fsops;
use crate::harness::{BuildSpec, GetSpec, Harness, HarnessError, HarnessRegistry, RunSpec};
use crate::process::Output;

/// What to do when a harness's prerequisites are not met.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrerequisitePolicy {
    /// Record the harness as skipped and continue with the next one.
    #[default]
    Skip,
    /// Stop the suite with the prerequisite error.
    Abort,
}

impl FromStr for PrerequisitePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(Self::Skip),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown prerequisite policy {other:?} (expected \"skip\" or \"abort\")")),
        }
    }
}

/// Lifecycle stage, for error reporting and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prerequisites,
    Get,
    Build,
    Run,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prerequisites => "prerequisites",
            Self::Get => "get",
            Self::Build => "build",
            Self::Run => "run",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the suite driver.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("no harness named {0:?}")]
    UnknownHarness(String),

    #[error("harness {harness}: {stage} stage failed")]
    Stage {
        harness: String,
        stage: Stage,
        #[source]
        source: HarnessError,
    },

    #[error("harness {harness}: {stage} stage timed out after {}s", after.as_secs())]
    TimedOut {
        harness: String,
        stage: Stage,
        after: Duration,
    },

    #[error("layout root {} is not an absolute path", .0.display())]
    RelativeLayout(PathBuf),

    #[error("failed to prepare {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the driver places per-harness directories.
#[derive(Debug, Clone)]
pub struct Layout {
    pub work_dir: PathBuf,
    pub bench_root: PathBuf,
    pub results_dir: PathBuf,
}

impl Layout {
    /// A layout whose roots are made absolute against the current
    /// directory. Tools run with their own working directory, so every
    /// path handed to a harness must be absolute.
    pub fn new(
        work_dir: impl AsRef<Path>,
        bench_root: impl AsRef<Path>,
        results_dir: impl AsRef<Path>,
    ) -> io::Result<Self> {
        Ok(Self {
            work_dir: std::path::absolute(work_dir)?,
            bench_root: std::path::absolute(bench_root)?,
            results_dir: std::path::absolute(results_dir)?,
        })
    }

    /// The first root that is not absolute, if any.
    pub fn relative_root(&self) -> Option<&Path> {
        [&self.work_dir, &self.bench_root, &self.results_dir]
            .into_iter()
            .map(PathBuf::as_path)
            .find(|p| !p.is_absolute())
    }

    pub fn source_dir(&self, harness: &str) -> PathBuf {
        self.work_dir.join(harness).join("src")
    }

    pub fn bin_dir(&self, harness: &str) -> PathBuf {
        self.work_dir.join(harness).join("bin")
    }

    pub fn tmp_dir(&self, harness: &str) -> PathBuf {
        self.work_dir.join(harness).join("tmp")
    }

    pub fn bench_dir(&self, harness: &str) -> PathBuf {
        self.bench_root.join(harness)
    }

    pub fn results_file(&self, harness: &str) -> PathBuf {
        self.results_dir.join(format!("{harness}.results"))
    }
}

/// Driver knobs.
#[derive(Debug, Clone, Default)]
pub struct SuiteOptions {
    pub policy: PrerequisitePolicy,
    /// Wall-clock limit per stage. `None` waits indefinitely.
    pub stage_timeout: Option<Duration>,
    pub short: bool,
    /// Base arguments for every benchmark variant.
    pub args: Vec<String>,
    /// Discard an existing source tree and fetch again.
    pub refetch: bool,
}

/// Per-harness result of a suite invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub name: String,
    pub outcome: Outcome,
}

/// Outcomes in the order harnesses were processed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub harnesses: Vec<HarnessReport>,
}

impl SuiteReport {
    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.harnesses
            .iter()
            .filter(|h| h.outcome == Outcome::Completed)
            .map(|h| h.name.as_str())
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&str, &str)> {
        self.harnesses.iter().filter_map(|h| match &h.outcome {
            Outcome::Skipped { reason } => Some((h.name.as_str(), reason.as_str())),
            Outcome::Completed => None,
        })
    }
}

/// Which stages a suite pass runs for each harness.
#[derive(Debug, Clone, Copy)]
struct Stages {
    get: bool,
    build: bool,
    run: bool,
}

/// Sequences harness lifecycles over a registry.
#[derive(Debug)]
pub struct Suite<'a> {
    registry: &'a HarnessRegistry,
    config: Config,
    layout: Layout,
    options: SuiteOptions,
}

impl<'a> Suite<'a> {
    pub fn new(registry: &'a HarnessRegistry, config: Config, layout: Layout, options: SuiteOptions) -> Self {
        Self {
            registry,
            config,
            layout,
            options,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Look up harnesses by name. An empty list selects every harness.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<&'a dyn Harness>, SuiteError> {
        if names.is_empty() {
            return Ok(self
                .registry
                .list()
                .into_iter()
                .filter_map(|n| self.registry.get(n))
                .collect());
        }
        names
            .iter()
            .map(|n| {
                self.registry
                    .get(n)
                    .ok_or_else(|| SuiteError::UnknownHarness(n.clone()))
            })
            .collect()
    }

    /// Fetch sources for the selected harnesses.
    pub async fn get(&self, names: &[String]) -> Result<SuiteReport, SuiteError> {
        self.drive(names, Stages { get: true, build: false, run: false }).await
    }

    /// Build the selected harnesses from already-fetched sources.
    pub async fn build(&self, names: &[String]) -> Result<SuiteReport, SuiteError> {
        self.drive(names, Stages { get: false, build: true, run: false }).await
    }

    /// Run the selected harnesses, building them first if `build_first`.
    pub async fn run(&self, names: &[String], build_first: bool) -> Result<SuiteReport, SuiteError> {
        self.drive(names, Stages { get: false, build: build_first, run: true }).await
    }

    async fn drive(&self, names: &[String], stages: Stages) -> Result<SuiteReport, SuiteError> {
        if let Some(root) = self.layout.relative_root() {
            return Err(SuiteError::RelativeLayout(root.to_path_buf()));
        }
        let harnesses = self.resolve(names)?;
        let mut report = SuiteReport::default();

        for harness in harnesses {
            let name = harness.name().to_string();
            let outcome = self.drive_one(harness, stages).await?;
            if let Outcome::Skipped { ref reason } = outcome {
                tracing::warn!(harness = %name, reason = %reason, "skipping harness");
            }
            report.harnesses.push(HarnessReport { name, outcome });
        }
        Ok(report)
    }

    async fn drive_one(&self, harness: &dyn Harness, stages: Stages) -> Result<Outcome, SuiteError> {
        let name = harness.name();

        if let Err(e) = harness.check_prerequisites() {
            if e.is_prerequisite_unmet() && self.options.policy == PrerequisitePolicy::Skip {
                return Ok(Outcome::Skipped { reason: e.to_string() });
            }
            return Err(SuiteError::Stage {
                harness: name.to_string(),
                stage: Stage::Prerequisites,
                source: e,
            });
        }

        if stages.get {
            self.get_one(harness).await?;
        }
        if stages.build {
            self.build_one(harness).await?;
        }
        if stages.run {
            self.run_one(harness).await?;
        }
        Ok(Outcome::Completed)
    }

    async fn get_one(&self, harness: &dyn Harness) -> Result<(), SuiteError> {
        let name = harness.name();
        let source_dir = self.layout.source_dir(name);

        if has_entries(&source_dir)? {
            if !self.options.refetch {
                tracing::info!(harness = %name, dir = %source_dir.display(), "source already present, not fetching");
                return Ok(());
            }
            fsops::purge_dir_contents(&source_dir).map_err(|source| io_err(&source_dir, source))?;
        }
        ensure_dir(&source_dir)?;

        let spec = GetSpec { source_dir };
        self.bounded(name, Stage::Get, harness.get(&self.config, &spec)).await
    }

    async fn build_one(&self, harness: &dyn Harness) -> Result<(), SuiteError> {
        let name = harness.name();
        let spec = BuildSpec {
            source_dir: self.layout.source_dir(name),
            bin_dir: self.layout.bin_dir(name),
            bench_dir: self.layout.bench_dir(name),
        };
        ensure_dir(&spec.bin_dir)?;

        self.bounded(name, Stage::Build, harness.build(&self.config, &spec)).await
    }

    async fn run_one(&self, harness: &dyn Harness) -> Result<(), SuiteError> {
        let name = harness.name();
        let tmp_dir = self.layout.tmp_dir(name);
        ensure_dir(&tmp_dir)?;
        // Residue from an interrupted earlier run must not leak into the
        // first variant.
        fsops::purge_dir_contents(&tmp_dir).map_err(|source| io_err(&tmp_dir, source))?;

        let results_path = self.layout.results_file(name);
        ensure_dir(&self.layout.results_dir)?;
        let results = std::fs::File::create(&results_path).map_err(|source| io_err(&results_path, source))?;

        let spec = RunSpec {
            bin_dir: self.layout.bin_dir(name),
            tmp_dir,
            args: self.options.args.clone(),
            short: self.options.short,
            results: Output::File(results),
        };

        self.bounded(name, Stage::Run, harness.run(&self.config, &spec)).await?;
        tracing::info!(harness = %name, results = %results_path.display(), "results written");
        Ok(())
    }

    /// Await a stage, applying the configured wall-clock limit.
    async fn bounded<F>(&self, harness: &str, stage: Stage, fut: F) -> Result<(), SuiteError>
    where
        F: Future<Output = Result<(), HarnessError>>,
    {
        tracing::info!(harness, %stage, "stage starting");
        let started = Instant::now();

        let result = match self.options.stage_timeout {
            Some(limit) => {
                let outcome = tokio::time::timeout(limit, fut).await;
                match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        // Cleanups armed by the dropped stage finish first.
                        let pending = self.config.cleanups().pending();
                        tracing::warn!(harness, %stage, pending, "stage timed out, awaiting cleanups");
                        self.config.cleanups().wait().await;
                        return Err(SuiteError::TimedOut {
                            harness: harness.to_string(),
                            stage,
                            after: limit,
                        });
                    }
                }
            }
            None => fut.await,
        };

        result.map_err(|source| SuiteError::Stage {
            harness: harness.to_string(),
            stage,
            source,
        })?;

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(harness, %stage, elapsed_ms, "stage complete");
        Ok(())
    }
}

fn io_err(path: &Path, source: io::Error) -> SuiteError {
    SuiteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn ensure_dir(path: &Path) -> Result<(), SuiteError> {
    std::fs::create_dir_all(path).map_err(|source| io_err(path, source))
}

fn has_entries(path: &Path) -> Result<bool, SuiteError> {
    match std::fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(io_err(path, source)),
    }
}
