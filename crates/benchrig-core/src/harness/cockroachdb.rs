//! CockroachDB harness.
//!
//! Builds `cockroach` from source with the toolchain under test and drives
//! it through a set of KV workloads on one- and three-node clusters.
//!
//! The build goes through cockroach's bazel setup only to generate code and
//! C dependencies; the binary itself is compiled with `go build` so that the
//! toolchain under test does the compiling.

use std::path::Path;

use async_trait::async_trait;

use super::trait_def::Harness;
use super::types::{BuildSpec, GetSpec, HarnessError, RunSpec};
use crate::config::Config;
use crate::pipeline::{Action, Pipeline};
use crate::process::Invocation;
use crate::runloop::RunLoop;
use crate::source::GitAcquirer;

const REPO_URL: &str = "https://github.com/cockroachdb/cockroach";
const REVISION: &str = "v24.1.0-rc.1";
const BAZELISK: &str = "github.com/bazelbuild/bazelisk@latest";

/// Contractual name of the server binary in `bin_dir`.
pub const SERVER_BIN: &str = "cockroach";
/// Contractual name of the benchmark driver in `bin_dir`.
pub const BENCH_BIN: &str = "cockroachdb-bench";

/// Variants in execution order.
pub const VARIANTS: &[&str] = &[
    "kv0/nodes=1",
    "kv50/nodes=1",
    "kv95/nodes=1",
    "kv0/nodes=3",
    "kv50/nodes=3",
    "kv95/nodes=3",
];

const SUPPORTED_ARCHES: &[&str] = &["x86_64", "aarch64"];

/// Harness for [CockroachDB](https://github.com/cockroachdb/cockroach).
#[derive(Debug, Clone, Copy, Default)]
pub struct CockroachDb;

impl CockroachDb {
    /// Prerequisite check for an explicit architecture name.
    pub fn check_arch(arch: &str) -> Result<(), HarnessError> {
        if SUPPORTED_ARCHES.contains(&arch) {
            return Ok(());
        }
        Err(HarnessError::PrerequisiteUnmet {
            harness: "cockroachdb".to_string(),
            reason: format!("requires x86_64 or aarch64, host is {arch}"),
        })
    }

    /// The build recipe for `spec`.
    pub fn pipeline(cfg: &Config, spec: &BuildSpec) -> Pipeline {
        let src = spec.source_dir.as_path();
        let tc = cfg.toolchain();
        let env = tc.env().clone();

        let bazel = |args: &[&str]| {
            Invocation::new("bazel")
                .args(args)
                .current_dir(src)
                .env(env.clone())
        };

        // `bazel clean --expunge` keeps the per-run bazel output base from
        // piling up across builds. Nothing to expunge before bazelisk exists.
        let expunge = bazel(&["clean", "--expunge"]);

        let run_under = format!("cd {} && ", src.display());
        let short_bin = spec.bin_dir.join("cockroach-short");
        let bench_bin = spec.bin_dir.join(BENCH_BIN);

        Pipeline::new("cockroachdb")
            .tracked_by(cfg.cleanups().clone())
            .exec("install-bazelisk", tc.install(BAZELISK))
            .defer_cleanup("bazel-expunge", Action::Exec(expunge))
            .exec("generate-code", bazel(&["run", "//pkg/gen:code"]))
            .exec(
                "generate-cgo",
                bazel(&["run", "//pkg/cmd/generate-cgo:generate-cgo", "--run_under", run_under.as_str()]),
            )
            .exec(
                "build-cockroach",
                tc.build_path(&src.join("pkg/cmd/cockroach-short"), &spec.bin_dir),
            )
            .copy("rename-cockroach", short_bin, spec.bin_dir.join(SERVER_BIN))
            .exec("build-bench-driver", tc.build_path(&spec.bench_dir, &bench_bin))
            .chmod("chmod-bench-driver", bench_bin, 0o755, true)
    }

    /// The run recipe for binaries in `bin_dir`.
    pub fn run_loop(bin_dir: &Path) -> RunLoop {
        RunLoop::new(bin_dir.join(BENCH_BIN), VARIANTS.iter().copied())
            .artifact("-cockroachdb-bin", bin_dir.join(SERVER_BIN))
    }
}

#[async_trait]
impl Harness for CockroachDb {
    fn name(&self) -> &str {
        "cockroachdb"
    }

    fn check_prerequisites(&self) -> Result<(), HarnessError> {
        Self::check_arch(std::env::consts::ARCH)
    }

    async fn get(&self, cfg: &Config, spec: &GetSpec) -> Result<(), HarnessError> {
        // Full clone: the build needs submodules such as PROJ.
        GitAcquirer::new()
            .clone_at(cfg.runner(), &spec.source_dir, REPO_URL, REVISION)
            .await?;
        Ok(())
    }

    async fn build(&self, cfg: &Config, spec: &BuildSpec) -> Result<(), HarnessError> {
        Self::pipeline(cfg, spec).execute(cfg.shared_runner()).await
    }

    async fn run(&self, cfg: &Config, spec: &RunSpec) -> Result<(), HarnessError> {
        Self::run_loop(&spec.bin_dir)
            .execute(cfg.runner(), &cfg.exec_env, spec)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::env::Env;
    use crate::process::ProcessRunner;

    fn cfg() -> Config {
        Config::new(
            "/opt/go",
            Env::from_pairs([("PATH", "/usr/bin")]),
            Env::empty(),
            Arc::new(ProcessRunner),
        )
    }

    #[test]
    fn supported_arches_pass() {
        assert!(CockroachDb::check_arch("x86_64").is_ok());
        assert!(CockroachDb::check_arch("aarch64").is_ok());
    }

    #[test]
    fn other_arches_are_unmet() {
        let err = CockroachDb::check_arch("riscv64").unwrap_err();
        assert!(err.is_prerequisite_unmet());
        assert!(err.to_string().contains("riscv64"), "{err}");
    }

    #[test]
    fn pipeline_steps_are_ordered() {
        let spec = BuildSpec {
            source_dir: PathBuf::from("/w/src"),
            bin_dir: PathBuf::from("/w/bin"),
            bench_dir: PathBuf::from("/suite/cockroachdb"),
        };
        let p = CockroachDb::pipeline(&cfg(), &spec);
        assert_eq!(
            p.step_names(),
            vec![
                "install-bazelisk",
                "generate-code",
                "generate-cgo",
                "build-cockroach",
                "rename-cockroach",
                "build-bench-driver",
                "chmod-bench-driver",
            ]
        );
    }

    #[test]
    fn run_loop_points_at_contractual_binaries() {
        let rl = CockroachDb::run_loop(Path::new("/w/bin"));
        assert_eq!(rl.driver, PathBuf::from("/w/bin/cockroachdb-bench"));
        assert_eq!(rl.variants.len(), 6);
        assert_eq!(rl.variants[0], "kv0/nodes=1");
        assert_eq!(
            rl.artifacts,
            vec![("-cockroachdb-bin".to_string(), PathBuf::from("/w/bin/cockroach"))]
        );
    }
}
