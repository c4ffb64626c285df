//! External process execution.
//!
//! An [`Invocation`] fully describes one process launch. Invocations are
//! executed through the [`Runner`] trait so that stages can be driven by
//! [`ProcessRunner`] in production and by a recording fake in tests.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

use crate::env::Env;

/// Tracing target used for command tracing.
pub const TRACE_TARGET: &str = "benchrig::exec";

/// Errors from launching or waiting on an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process could not be started, or waiting on it failed.
    #[error("failed to launch `{command}` (dir: {dir})")]
    Launch {
        command: String,
        dir: String,
        #[source]
        source: io::Error,
    },

    /// The process ran but did not exit successfully.
    #[error("`{command}` (dir: {dir}) {}", describe_exit(.code))]
    Exit {
        command: String,
        dir: String,
        /// Exit code, or `None` if the process was killed by a signal.
        code: Option<i32>,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exited with code {c}"),
        None => "was terminated by a signal".to_string(),
    }
}

impl ProcessError {
    /// The command line of the failed invocation.
    pub fn command(&self) -> &str {
        match self {
            Self::Launch { command, .. } | Self::Exit { command, .. } => command,
        }
    }
}

/// Destination for a child's stdout or stderr.
#[derive(Debug, Default)]
pub enum Output {
    /// Share the parent's stream.
    #[default]
    Inherit,
    /// Discard output.
    Null,
    /// Append to an open file.
    File(File),
}

impl Output {
    /// Duplicate the handle so the same file can back stdout and stderr.
    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(match self {
            Self::Inherit => Self::Inherit,
            Self::Null => Self::Null,
            Self::File(f) => Self::File(f.try_clone()?),
        })
    }

    fn into_stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Null => Stdio::null(),
            Self::File(f) => Stdio::from(f),
        }
    }
}

/// One fully resolved process launch.
#[derive(Debug)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    /// Working directory; `None` keeps the parent's.
    pub working_dir: Option<PathBuf>,
    /// Complete child environment; `None` inherits the parent's.
    pub env: Option<Env>,
    pub stdout: Output,
    pub stderr: Output,
    /// Log the command line before launch.
    pub trace: bool,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: None,
            stdout: Output::Inherit,
            stderr: Output::Inherit,
            trace: true,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Replace the child's environment with `env`.
    pub fn env(mut self, env: Env) -> Self {
        self.env = Some(env);
        self
    }

    pub fn stdout(mut self, out: Output) -> Self {
        self.stdout = out;
        self
    }

    pub fn stderr(mut self, out: Output) -> Self {
        self.stderr = out;
        self
    }

    /// Disable command tracing for this invocation.
    pub fn quiet(mut self) -> Self {
        self.trace = false;
        self
    }

    /// Program and arguments joined by spaces. Never includes env values.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Human-readable working directory for diagnostics.
    pub fn dir_label(&self) -> String {
        self.working_dir
            .as_deref()
            .map(Path::display)
            .map(|d| d.to_string())
            .unwrap_or_else(|| "<inherited>".to_string())
    }
}

/// Executes invocations.
///
/// Calls complete only when the process has exited. Implementations never
/// retry; that decision belongs to the caller.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn run(&self, invocation: Invocation) -> Result<(), ProcessError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Runner) {}
};

/// [`Runner`] that spawns real child processes.
///
/// Children are killed if the awaiting future is dropped, which lets callers
/// bound a stage with `tokio::time::timeout`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, invocation: Invocation) -> Result<(), ProcessError> {
        let command = invocation.command_line();
        let dir = invocation.dir_label();

        if invocation.trace {
            tracing::debug!(target: TRACE_TARGET, command = %command, dir = %dir, "exec");
        }

        let Invocation {
            program,
            args,
            working_dir,
            env,
            stdout,
            stderr,
            ..
        } = invocation;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(stdout.into_stdio())
            .stderr(stderr.into_stdio())
            .kill_on_drop(true);

        if let Some(ref wd) = working_dir {
            cmd.current_dir(wd);
        }
        if let Some(ref env) = env {
            cmd.env_clear();
            cmd.envs(env.iter());
        }

        let status = cmd.status().await.map_err(|source| ProcessError::Launch {
            command: command.clone(),
            dir: dir.clone(),
            source,
        })?;

        if !status.success() {
            return Err(ProcessError::Exit {
                command,
                dir,
                code: status.code(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn capture_file(dir: &TempDir) -> (PathBuf, File) {
        let path = dir.path().join("out.txt");
        let file = File::create(&path).expect("create capture file");
        (path, file)
    }

    #[tokio::test]
    async fn successful_command_returns_ok() {
        ProcessRunner
            .run(Invocation::new("true"))
            .await
            .expect("true should succeed");
    }

    #[tokio::test]
    async fn non_zero_exit_reports_command_line() {
        let err = ProcessRunner
            .run(Invocation::new("sh").args(["-c", "exit 3"]).current_dir("/tmp"))
            .await
            .unwrap_err();

        match &err {
            ProcessError::Exit { command, dir, code } => {
                assert_eq!(command, "sh -c exit 3");
                assert_eq!(dir, "/tmp");
                assert_eq!(*code, Some(3));
            }
            other => panic!("expected Exit, got {other:?}"),
        }
        assert!(err.to_string().contains("exited with code 3"), "{err}");
    }

    #[tokio::test]
    async fn missing_program_is_a_launch_error() {
        let err = ProcessRunner
            .run(Invocation::new("benchrig_no_such_program_for_tests"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Launch { .. }), "{err:?}");
        assert_eq!(err.command(), "benchrig_no_such_program_for_tests");
    }

    #[tokio::test]
    async fn overlay_replaces_ambient_environment() {
        let tmp = TempDir::new().unwrap();
        let (path, file) = capture_file(&tmp);

        let env = Env::empty().must_set("BENCHRIG_MARKER", "1");
        ProcessRunner
            .run(
                Invocation::new("/bin/sh")
                    .args(["-c", "echo \"marker=$BENCHRIG_MARKER path=${PATH-unset}\""])
                    .env(env)
                    .stdout(Output::File(file)),
            )
            .await
            .expect("sh should succeed");

        let out = std::fs::read_to_string(path).unwrap();
        assert_eq!(out.trim(), "marker=1 path=unset");
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let tmp = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let (path, file) = capture_file(&tmp);

        ProcessRunner
            .run(
                Invocation::new("/bin/sh")
                    .args(["-c", "pwd -P"])
                    .current_dir(work.path())
                    .stdout(Output::File(file)),
            )
            .await
            .unwrap();

        let out = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            PathBuf::from(out.trim()),
            work.path().canonicalize().unwrap()
        );
    }

    #[tokio::test]
    async fn stdout_and_stderr_share_a_cloned_file() {
        let tmp = TempDir::new().unwrap();
        let (path, file) = capture_file(&tmp);
        let out = Output::File(file);
        let err = out.try_clone().unwrap();

        ProcessRunner
            .run(
                Invocation::new("/bin/sh")
                    .args(["-c", "echo to-out; echo to-err >&2"])
                    .stdout(out)
                    .stderr(err),
            )
            .await
            .unwrap();

        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("to-out"), "{text:?}");
        assert!(text.contains("to-err"), "{text:?}");
    }

    #[test]
    fn command_line_omits_environment() {
        let inv = Invocation::new("bazel")
            .args(["run", "//pkg/gen:code"])
            .env(Env::empty().must_set("SECRET_TOKEN", "hunter2"));
        assert_eq!(inv.command_line(), "bazel run //pkg/gen:code");
        assert_eq!(inv.dir_label(), "<inherited>");
    }
}
