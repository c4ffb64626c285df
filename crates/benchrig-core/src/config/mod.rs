//! Resolved configuration shared by every harness stage.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::env::Env;
use crate::pipeline::CleanupTracker;
use crate::process::{Invocation, Runner};

/// The toolchain under test.
///
/// Harnesses use it to install auxiliary tools and to compile Go packages
/// (the benchmarked project itself, and the benchmark driver). Its
/// environment is the build environment with the toolchain's `bin`
/// directory first on `PATH` and `GOROOT` pinned to the toolchain root.
#[derive(Debug, Clone)]
pub struct Toolchain {
    root: PathBuf,
    env: Env,
}

impl Toolchain {
    pub fn new(root: impl Into<PathBuf>, build_env: &Env) -> Self {
        let root = root.into();
        let env = build_env
            .prefix("PATH", format!("{}:", root.join("bin").display()))
            .must_set("GOROOT", root.display().to_string());
        Self { root, env }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    /// Path to the `go` command of this toolchain.
    pub fn tool(&self) -> PathBuf {
        self.bin_dir().join("go")
    }

    pub fn env(&self) -> &Env {
        &self.env
    }

    /// `go install <package>`.
    pub fn install(&self, package: &str) -> Invocation {
        Invocation::new(self.tool())
            .args(["install", package])
            .env(self.env.clone())
    }

    /// `go build -o <out>` run inside `src`.
    ///
    /// If `out` is an existing directory, the binary is named after the
    /// package directory.
    pub fn build_path(&self, src: &Path, out: &Path) -> Invocation {
        Invocation::new(self.tool())
            .args(["build", "-o"])
            .arg(out)
            .current_dir(src)
            .env(self.env.clone())
    }
}

/// Everything a harness stage receives besides its per-stage spec.
#[derive(Clone)]
pub struct Config {
    pub toolchain: Toolchain,
    /// Base environment for build steps.
    pub build_env: Env,
    /// Base environment for benchmark processes.
    pub exec_env: Env,
    runner: Arc<dyn Runner>,
    cleanups: CleanupTracker,
}

impl Config {
    pub fn new(toolchain_root: impl Into<PathBuf>, build_env: Env, exec_env: Env, runner: Arc<dyn Runner>) -> Self {
        let toolchain = Toolchain::new(toolchain_root, &build_env);
        Self {
            toolchain,
            build_env,
            exec_env,
            runner,
            cleanups: CleanupTracker::new(),
        }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// The runner every stage must launch processes through.
    pub fn runner(&self) -> &dyn Runner {
        self.runner.as_ref()
    }

    /// A shared handle to the runner, for cleanup guards that may outlive
    /// the current call.
    pub fn shared_runner(&self) -> Arc<dyn Runner> {
        Arc::clone(&self.runner)
    }

    /// Cleanups dispatched by builds abandoned under this config.
    pub fn cleanups(&self) -> &CleanupTracker {
        &self.cleanups
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("toolchain", &self.toolchain.root)
            .field("build_env_vars", &self.build_env.len())
            .field("exec_env_vars", &self.exec_env.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessRunner;

    #[test]
    fn toolchain_env_prefixes_path_and_sets_goroot() {
        let base = Env::from_pairs([("PATH", "/usr/bin"), ("GOROOT", "/old")]);
        let tc = Toolchain::new("/opt/go", &base);

        assert_eq!(tc.env().get("PATH"), Some("/opt/go/bin:/usr/bin"));
        assert_eq!(tc.env().get("GOROOT"), Some("/opt/go"));
        assert_eq!(base.get("GOROOT"), Some("/old"), "base env is untouched");
    }

    #[test]
    fn build_path_runs_in_source_dir() {
        let tc = Toolchain::new("/opt/go", &Env::empty());
        let inv = tc.build_path(Path::new("/src/cmd/tool"), Path::new("/bin/tool"));

        assert_eq!(inv.command_line(), "/opt/go/bin/go build -o /bin/tool");
        assert_eq!(inv.working_dir.as_deref(), Some(Path::new("/src/cmd/tool")));
        assert!(inv.env.is_some());
    }

    #[test]
    fn install_uses_toolchain_go() {
        let tc = Toolchain::new("/opt/go", &Env::empty());
        let inv = tc.install("example.com/tool@latest");
        assert_eq!(inv.command_line(), "/opt/go/bin/go install example.com/tool@latest");
    }

    #[test]
    fn debug_omits_env_values() {
        let cfg = Config::new(
            "/opt/go",
            Env::empty().must_set("TOKEN", "s3cret"),
            Env::empty(),
            Arc::new(ProcessRunner),
        );
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("s3cret"), "{dbg}");
        assert!(dbg.contains("/opt/go"));
    }
}
