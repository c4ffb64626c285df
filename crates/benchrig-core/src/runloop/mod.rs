//! Sequential execution of benchmark variants.
//!
//! Every variant runs the same benchmark driver binary with a different
//! selector. The scratch directory is shared between variants and purged
//! after each one, whether it passed or failed, so that a benchmarked
//! system never resumes state left behind by the previous variant.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::env::Env;
use crate::fsops;
use crate::harness::{HarnessError, RunSpec};
use crate::pipeline::StepError;
use crate::process::{Invocation, Runner};

/// Declarative description of a harness's run stage.
#[derive(Debug, Clone)]
pub struct RunLoop {
    /// Benchmark driver binary.
    pub driver: PathBuf,
    /// Variant identifiers, run in this order.
    pub variants: Vec<String>,
    /// Flag that selects the variant (e.g. `-bench`).
    pub selector_flag: String,
    /// Flag/path pairs pointing the driver at built artifacts.
    pub artifacts: Vec<(String, PathBuf)>,
    /// Flag that receives the scratch directory (e.g. `-tmp`).
    pub scratch_flag: String,
    /// Flag appended in short mode (e.g. `-short`).
    pub short_flag: String,
}

impl RunLoop {
    /// A run loop for `driver` with go-style flag names.
    pub fn new<I, S>(driver: impl Into<PathBuf>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            driver: driver.into(),
            variants: variants.into_iter().map(Into::into).collect(),
            selector_flag: "-bench".to_string(),
            artifacts: Vec::new(),
            scratch_flag: "-tmp".to_string(),
            short_flag: "-short".to_string(),
        }
    }

    /// Pass an artifact path to the driver under `flag`.
    pub fn artifact(mut self, flag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push((flag.into(), path.into()));
        self
    }

    /// Full argument list for one variant.
    ///
    /// Order: base args, selector, artifacts, scratch dir, short flag.
    pub fn args_for(&self, spec: &RunSpec, variant: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = spec.args.iter().map(OsString::from).collect();
        args.push(self.selector_flag.clone().into());
        args.push(variant.into());
        for (flag, path) in &self.artifacts {
            args.push(flag.clone().into());
            args.push(path.clone().into_os_string());
        }
        args.push(self.scratch_flag.clone().into());
        args.push(spec.tmp_dir.clone().into_os_string());
        if spec.short {
            args.push(self.short_flag.clone().into());
        }
        args
    }

    /// Run each variant in order with `env` as the complete environment.
    ///
    /// Stops at the first failing variant.
    pub async fn execute(&self, runner: &dyn Runner, env: &Env, spec: &RunSpec) -> Result<(), HarnessError> {
        for variant in &self.variants {
            tracing::info!(variant = %variant, short = spec.short, "running benchmark variant");

            let ran = self.run_variant(runner, env, spec, variant).await;
            let purged = fsops::purge_dir_contents(&spec.tmp_dir).map_err(|source| StepError::Io {
                action: "purge",
                path: spec.tmp_dir.clone(),
                source,
            });

            let result = match (ran, purged) {
                (Err(e), Err(purge)) => {
                    tracing::warn!(variant = %variant, error = %purge, "scratch purge failed after variant failure");
                    Err(e)
                }
                (Err(e), Ok(_)) | (Ok(()), Err(e)) => Err(e),
                (Ok(()), Ok(removed)) => {
                    tracing::debug!(variant = %variant, removed, "scratch purged");
                    Ok(())
                }
            };

            result.map_err(|source| HarnessError::RunStep {
                variant: variant.clone(),
                source,
            })?;
        }
        Ok(())
    }

    async fn run_variant(&self, runner: &dyn Runner, env: &Env, spec: &RunSpec, variant: &str) -> Result<(), StepError> {
        let io_err = |source| StepError::Io {
            action: "attach results sink for",
            path: self.driver.clone(),
            source,
        };
        let stdout = spec.results.try_clone().map_err(io_err)?;
        let stderr = spec.results.try_clone().map_err(io_err)?;

        let invocation = Invocation::new(&self.driver)
            .args(self.args_for(spec, variant))
            .env(env.clone())
            .stdout(stdout)
            .stderr(stderr);

        runner.run(invocation).await?;
        Ok(())
    }
}
