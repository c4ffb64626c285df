//! Shared test utilities for benchrig integration tests.
//!
//! - [`RecordingRunner`]: a [`Runner`] that records invocations instead of
//!   launching them, with scripted failures, delays and per-call hooks.
//! - [`FakeHarness`]: a configurable harness that logs the stages it saw.
//! - Temporary git repositories for source-acquisition tests.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use benchrig_core::config::Config;
use benchrig_core::env::Env;
use benchrig_core::harness::{BuildSpec, GetSpec, Harness, HarnessError, RunSpec};
use benchrig_core::process::{Invocation, Output, ProcessError, Runner};

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// A recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Collapsed environment, if the invocation replaced it.
    pub env: Option<Vec<String>>,
}

impl Call {
    /// Value following `flag` in the argument list.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Program and args joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type Predicate = Box<dyn Fn(&Call) -> bool + Send + Sync>;
type Hook = Box<dyn Fn(&Call) + Send + Sync>;

/// Records every invocation; never launches a process.
///
/// Calls matching a [`fail_when`](Self::fail_when) predicate return
/// [`ProcessError::Exit`] with code 1. Hooks run before the failure check,
/// so they observe failing calls too.
#[derive(Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<Call>>,
    failures: Vec<Predicate>,
    hooks: Vec<Hook>,
    delays: Vec<(String, Duration)>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_when(mut self, pred: impl Fn(&Call) -> bool + Send + Sync + 'static) -> Self {
        self.failures.push(Box::new(pred));
        self
    }

    /// Fail any call whose program path ends with `suffix`.
    pub fn fail_program(self, suffix: &str) -> Self {
        let suffix = suffix.to_string();
        self.fail_when(move |c| c.program.ends_with(&suffix))
    }

    /// Sleep for `delay` before recording any call whose program ends with
    /// `suffix`. A call dropped mid-sleep is never recorded.
    pub fn delay_program(mut self, suffix: &str, delay: Duration) -> Self {
        self.delays.push((suffix.to_string(), delay));
        self
    }

    pub fn on_run(mut self, hook: impl Fn(&Call) + Send + Sync + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of recorded calls whose program ends with `suffix`.
    pub fn count_program(&self, suffix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.program.ends_with(suffix))
            .count()
    }
}

impl std::fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("calls", &self.count())
            .field("failure_rules", &self.failures.len())
            .field("delays", &self.delays.len())
            .finish()
    }
}

#[async_trait]
impl Runner for RecordingRunner {
    async fn run(&self, invocation: Invocation) -> Result<(), ProcessError> {
        let call = Call {
            program: invocation.program.to_string_lossy().into_owned(),
            args: invocation
                .args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect(),
            working_dir: invocation.working_dir.clone(),
            env: invocation.env.as_ref().map(Env::collapse),
        };

        let delay = self
            .delays
            .iter()
            .find(|(suffix, _)| call.program.ends_with(suffix.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        for hook in &self.hooks {
            hook(&call);
        }
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.clone());

        if self.failures.iter().any(|p| p(&call)) {
            return Err(ProcessError::Exit {
                command: invocation.command_line(),
                dir: invocation.dir_label(),
                code: Some(1),
            });
        }
        Ok(())
    }
}

/// A [`Config`] with empty environments backed by `runner`.
pub fn test_config(runner: Arc<dyn Runner>) -> Config {
    Config::new("/opt/go", Env::empty(), Env::empty(), runner)
}

// ---------------------------------------------------------------------------
// FakeHarness
// ---------------------------------------------------------------------------

/// A harness whose stages only record that they ran.
///
/// Log entries have the form `"<name>:<stage>"`.
#[derive(Debug, Clone)]
pub struct FakeHarness {
    name: String,
    unmet: Option<String>,
    fail_build: bool,
    run_delay: Option<Duration>,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeHarness {
    pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            unmet: None,
            fail_build: false,
            run_delay: None,
            log,
        }
    }

    /// Report unmet prerequisites with `reason`.
    pub fn unmet(mut self, reason: &str) -> Self {
        self.unmet = Some(reason.to_string());
        self
    }

    /// Fail the build stage with a process error.
    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    /// Sleep this long in the run stage.
    pub fn slow_run(mut self, delay: Duration) -> Self {
        self.run_delay = Some(delay);
        self
    }

    fn record(&self, stage: &str) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{}:{stage}", self.name));
    }
}

#[async_trait]
impl Harness for FakeHarness {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_prerequisites(&self) -> Result<(), HarnessError> {
        match &self.unmet {
            Some(reason) => Err(HarnessError::PrerequisiteUnmet {
                harness: self.name.clone(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn get(&self, _cfg: &Config, spec: &GetSpec) -> Result<(), HarnessError> {
        self.record("get");
        let marker = spec.source_dir.join("SOURCE");
        std::fs::write(&marker, &self.name)
            .unwrap_or_else(|e| panic!("failed to write {}: {e}", marker.display()));
        Ok(())
    }

    async fn build(&self, _cfg: &Config, _spec: &BuildSpec) -> Result<(), HarnessError> {
        self.record("build");
        if self.fail_build {
            return Err(HarnessError::BuildStep {
                index: 1,
                name: "compile".to_string(),
                source: ProcessError::Exit {
                    command: "go build".to_string(),
                    dir: "<inherited>".to_string(),
                    code: Some(2),
                }
                .into(),
            });
        }
        Ok(())
    }

    async fn run(&self, _cfg: &Config, spec: &RunSpec) -> Result<(), HarnessError> {
        self.record("run");
        if let Some(delay) = self.run_delay {
            tokio::time::sleep(delay).await;
        }
        if let Output::File(ref f) = spec.results {
            let mut f: &std::fs::File = f;
            writeln!(f, "BenchmarkFake/{} 1 100 ns/op", self.name).ok();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Git repositories
// ---------------------------------------------------------------------------

/// Run git in `dir`, panicking with stderr on failure. Returns stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_CONFIG_COUNT", "1")
        .env("GIT_CONFIG_KEY_0", "protocol.file.allow")
        .env("GIT_CONFIG_VALUE_0", "always")
        .output()
        .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create a temporary git repository with one commit containing
/// `README.md`.
pub fn create_temp_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().join("repo");
    std::fs::create_dir(&repo_path).expect("failed to create repo dir");

    git(&repo_path, &["init", "--quiet"]);
    git(&repo_path, &["config", "user.email", "test@benchrig.dev"]);
    git(&repo_path, &["config", "user.name", "Benchrig Test"]);
    commit_file(&repo_path, "README.md", "# Test repo\n", "Initial commit");

    (dir, repo_path)
}

/// Write `name` with `contents`, commit it, and return the new HEAD sha.
pub fn commit_file(repo: &Path, name: &str, contents: &str, message: &str) -> String {
    let path = repo.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    std::fs::write(&path, contents).expect("failed to write file");
    git(repo, &["add", "."]);
    git(repo, &["commit", "--quiet", "-m", message]);
    git(repo, &["rev-parse", "HEAD"])
}

/// Sorted list of tracked files, including those in submodules.
pub fn tracked_files(repo: &Path) -> Vec<String> {
    let out = git(repo, &["ls-files", "--recurse-submodules"]);
    let mut files: Vec<String> = out.lines().map(str::to_string).collect();
    files.sort();
    files
}

/// Ambient environment plus the git config that allows `file://`
/// submodules, which recent git versions refuse by default.
pub fn git_test_env() -> Env {
    Env::from_process()
        .must_set("GIT_CONFIG_COUNT", "1")
        .must_set("GIT_CONFIG_KEY_0", "protocol.file.allow")
        .must_set("GIT_CONFIG_VALUE_0", "always")
}
