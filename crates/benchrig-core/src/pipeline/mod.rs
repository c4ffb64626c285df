//! Ordered build pipelines with scoped cleanup.
//!
//! A harness describes its build as a list of [`Step`]s and hands the list
//! to [`Pipeline::execute`]. Steps run strictly in order and the first
//! failure aborts the rest.
//!
//! ```text
//! exec install-tool
//! defer_cleanup  ----------------------+
//! exec generate                        |  armed from here on
//! exec compile                         |
//! copy rename-artifact                 |
//!                                      v
//!                           cleanup runs exactly once
//! ```
//!
//! A cleanup registered with [`Pipeline::defer_cleanup`] is armed just
//! before the next step runs. Once armed it runs exactly once, whichever
//! way control leaves [`Pipeline::execute`]. If the execute future is
//! dropped mid-build (for example by a stage timeout), the guard dispatches
//! the cleanup onto the current tokio runtime. A pipeline attached to a
//! [`CleanupTracker`] records that dispatched task so the caller can await
//! it with [`CleanupTracker::wait`] before shutting the runtime down.
//! Cleanup failures are logged and never replace the build error.

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use thiserror::Error;

use crate::fsops;
use crate::harness::HarnessError;
use crate::process::{Invocation, ProcessError, Runner};

/// Failure of a single pipeline or run-loop step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a step does.
#[derive(Debug)]
pub enum Action {
    /// Run an external tool.
    Exec(Invocation),
    /// Copy a file, preserving permissions.
    Copy { from: PathBuf, to: PathBuf },
    /// Set permission bits.
    Chmod {
        path: PathBuf,
        mode: u32,
        recursive: bool,
    },
}

/// A named pipeline step.
#[derive(Debug)]
pub struct Step {
    pub name: String,
    pub action: Action,
}

/// Cleanups dispatched by abandoned pipelines.
///
/// Clones share the same set of tasks.
#[derive(Debug, Clone, Default)]
pub struct CleanupTracker {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl CleanupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, handle: JoinHandle<()>) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    /// Number of dispatched cleanups not yet awaited.
    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Await every dispatched cleanup, including ones dispatched while
    /// waiting.
    pub async fn wait(&self) {
        loop {
            let batch = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()));
            if batch.is_empty() {
                return;
            }
            for handle in batch {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "abandoned cleanup task did not finish");
                }
            }
        }
    }
}

/// An ordered list of build steps.
#[derive(Debug)]
pub struct Pipeline {
    label: String,
    steps: Vec<Step>,
    /// Cleanup and the index of the step it is armed before.
    cleanup: Option<(usize, Step)>,
    tracker: Option<CleanupTracker>,
}

impl Pipeline {
    /// Start an empty pipeline. `label` appears in logs (usually the
    /// harness name).
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
            cleanup: None,
            tracker: None,
        }
    }

    /// Record a cleanup dispatched from an abandoned build in `tracker`.
    pub fn tracked_by(mut self, tracker: CleanupTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn step(mut self, name: impl Into<String>, action: Action) -> Self {
        self.steps.push(Step {
            name: name.into(),
            action,
        });
        self
    }

    pub fn exec(self, name: impl Into<String>, invocation: Invocation) -> Self {
        self.step(name, Action::Exec(invocation))
    }

    pub fn copy(self, name: impl Into<String>, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        self.step(
            name,
            Action::Copy {
                from: from.into(),
                to: to.into(),
            },
        )
    }

    pub fn chmod(self, name: impl Into<String>, path: impl Into<PathBuf>, mode: u32, recursive: bool) -> Self {
        self.step(
            name,
            Action::Chmod {
                path: path.into(),
                mode,
                recursive,
            },
        )
    }

    /// Register a best-effort cleanup, armed before the next added step.
    ///
    /// Registering again replaces the previous cleanup.
    pub fn defer_cleanup(mut self, name: impl Into<String>, action: Action) -> Self {
        let at = self.steps.len();
        self.cleanup = Some((
            at,
            Step {
                name: name.into(),
                action,
            },
        ));
        self
    }

    /// Number of steps, excluding cleanup.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every step in order, stopping at the first failure.
    pub async fn execute(self, runner: Arc<dyn Runner>) -> Result<(), HarnessError> {
        let Pipeline {
            label,
            steps,
            mut cleanup,
            tracker,
        } = self;
        let total = steps.len();
        let mut guard: Option<CleanupGuard> = None;
        let mut outcome = Ok(());

        for (i, step) in steps.into_iter().enumerate() {
            if cleanup.as_ref().is_some_and(|(at, _)| *at == i) {
                guard = cleanup
                    .take()
                    .map(|(_, step)| CleanupGuard::arm(&label, step, Arc::clone(&runner), tracker.clone()));
            }

            let Step { name, action } = step;
            let index = i + 1;
            tracing::info!(pipeline = %label, step = %name, index, total, "build step");

            if let Err(source) = perform(action, runner.as_ref()).await {
                tracing::warn!(pipeline = %label, step = %name, index, error = %source, "build step failed");
                outcome = Err(HarnessError::BuildStep {
                    index,
                    name,
                    source,
                });
                break;
            }
        }

        // A cleanup registered after the last step is reached only when
        // every step succeeded.
        if outcome.is_ok() {
            if let Some((_, step)) = cleanup.take() {
                guard = Some(CleanupGuard::arm(&label, step, Arc::clone(&runner), tracker.clone()));
            }
        }

        if let Some(guard) = guard {
            guard.release().await;
        }
        outcome
    }
}

async fn perform(action: Action, runner: &dyn Runner) -> Result<(), StepError> {
    match action {
        Action::Exec(invocation) => runner.run(invocation).await.map_err(StepError::from),
        Action::Copy { from, to } => tokio::fs::copy(&from, &to)
            .await
            .map(|_| ())
            .map_err(|source| StepError::Io {
                action: "copy",
                path: from,
                source,
            }),
        Action::Chmod {
            path,
            mode,
            recursive,
        } => fsops::set_mode(&path, mode, recursive).map_err(|source| StepError::Io {
            action: "chmod",
            path,
            source,
        }),
    }
}

/// Holds an armed cleanup until it is released or dropped.
struct CleanupGuard {
    label: String,
    step: Option<Step>,
    runner: Arc<dyn Runner>,
    tracker: Option<CleanupTracker>,
}

impl CleanupGuard {
    fn arm(label: &str, step: Step, runner: Arc<dyn Runner>, tracker: Option<CleanupTracker>) -> Self {
        tracing::debug!(pipeline = %label, cleanup = %step.name, "cleanup armed");
        Self {
            label: label.to_string(),
            step: Some(step),
            runner,
            tracker,
        }
    }

    async fn release(mut self) {
        if let Some(step) = self.step.take() {
            run_cleanup(&self.label, step, self.runner.as_ref()).await;
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let Some(step) = self.step.take() else {
            return;
        };
        let label = std::mem::take(&mut self.label);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(pipeline = %label, cleanup = %step.name, "build abandoned, dispatching cleanup");
                let runner = Arc::clone(&self.runner);
                let task = handle.spawn(async move {
                    run_cleanup(&label, step, runner.as_ref()).await;
                });
                if let Some(ref tracker) = self.tracker {
                    tracker.track(task);
                }
            }
            Err(_) => {
                tracing::warn!(pipeline = %label, cleanup = %step.name, "no runtime available, cleanup skipped");
            }
        }
    }
}

async fn run_cleanup(label: &str, step: Step, runner: &dyn Runner) {
    let Step { name, action } = step;
    tracing::info!(pipeline = %label, cleanup = %name, "running cleanup");
    if let Err(e) = perform(action, runner).await {
        tracing::warn!(pipeline = %label, cleanup = %name, error = %e, "cleanup failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessRunner;
    use tempfile::TempDir;

    fn runner() -> Arc<dyn Runner> {
        Arc::new(ProcessRunner)
    }

    #[tokio::test]
    async fn copy_step_renames_artifact() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("tool-short");
        std::fs::write(&from, "binary").unwrap();

        Pipeline::new("test")
            .copy("rename", &from, tmp.path().join("tool"))
            .execute(runner())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(tmp.path().join("tool")).unwrap(), "binary");
        assert!(from.exists(), "copy leaves the original in place");
    }

    #[tokio::test]
    async fn missing_copy_source_is_a_build_step_failure() {
        let tmp = TempDir::new().unwrap();

        let err = Pipeline::new("test")
            .exec("ok", Invocation::new("true"))
            .copy("rename", tmp.path().join("absent"), tmp.path().join("dst"))
            .execute(runner())
            .await
            .unwrap_err();

        match err {
            HarnessError::BuildStep { index, name, source } => {
                assert_eq!(index, 2);
                assert_eq!(name, "rename");
                assert!(matches!(source, StepError::Io { action: "copy", .. }));
            }
            other => panic!("expected BuildStep, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_mask_success() {
        Pipeline::new("test")
            .defer_cleanup("clean", Action::Exec(Invocation::new("false")))
            .exec("ok", Invocation::new("true"))
            .execute(runner())
            .await
            .expect("cleanup failure must not fail the build");
    }

    #[tokio::test]
    async fn failing_cleanup_does_not_replace_build_error() {
        let err = Pipeline::new("test")
            .defer_cleanup("clean", Action::Exec(Invocation::new("false")))
            .exec("boom", Invocation::new("sh").args(["-c", "exit 7"]))
            .execute(runner())
            .await
            .unwrap_err();

        match err {
            HarnessError::BuildStep { name, source: StepError::Process(p), .. } => {
                assert_eq!(name, "boom");
                assert!(p.command().contains("exit 7"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn step_names_preserve_order() {
        let p = Pipeline::new("test")
            .exec("one", Invocation::new("true"))
            .defer_cleanup("clean", Action::Exec(Invocation::new("true")))
            .exec("two", Invocation::new("true"));
        assert_eq!(p.step_names(), vec!["one", "two"]);
        assert_eq!(p.len(), 2);
    }
}
