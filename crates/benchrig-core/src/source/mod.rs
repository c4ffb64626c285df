//! Source acquisition from git remotes.
//!
//! Harnesses pin an exact tag or commit. Clones are always full depth and
//! include submodules, since some build systems read history or submodule
//! metadata that shallow clones lack.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::env::Env;
use crate::process::{Invocation, Output, ProcessError, Runner};

/// Errors that can occur while acquiring a source tree.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// `git clone` failed.
    #[error("failed to clone {url}")]
    Clone {
        url: String,
        #[source]
        source: ProcessError,
    },

    /// `git checkout` of the pinned revision failed.
    #[error("failed to check out revision {revision}")]
    Checkout {
        revision: String,
        #[source]
        source: ProcessError,
    },

    /// Submodule initialisation or update failed.
    #[error("failed to sync submodules at revision {revision}")]
    SubmoduleSync {
        revision: String,
        #[source]
        source: ProcessError,
    },
}

/// Clones git repositories at pinned revisions.
#[derive(Debug, Clone)]
pub struct GitAcquirer {
    git: PathBuf,
    env: Option<Env>,
    quiet: bool,
}

impl Default for GitAcquirer {
    fn default() -> Self {
        Self::new()
    }
}

impl GitAcquirer {
    /// Use `git` from `$PATH` with the parent's environment.
    pub fn new() -> Self {
        Self {
            git: PathBuf::from("git"),
            env: None,
            quiet: false,
        }
    }

    /// Use a specific git binary.
    pub fn with_git(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    /// Run git with exactly this environment.
    pub fn with_env(mut self, env: Env) -> Self {
        self.env = Some(env);
        self
    }

    /// Discard git's progress output.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    fn git(&self) -> Invocation {
        let mut inv = Invocation::new(&self.git);
        if let Some(ref env) = self.env {
            inv = inv.env(env.clone());
        }
        if self.quiet {
            inv = inv.stdout(Output::Null).stderr(Output::Null);
        }
        inv
    }

    /// Clone `url` into `dest` and resolve the working tree to `revision`.
    ///
    /// `dest` must be empty or absent. Every step must succeed; a submodule
    /// failure fails the whole acquisition even though the top-level clone
    /// is already on disk.
    pub async fn clone_at(
        &self,
        runner: &dyn Runner,
        dest: &Path,
        url: &str,
        revision: &str,
    ) -> Result<(), AcquireError> {
        tracing::info!(url, revision, dest = %dest.display(), "cloning source");

        runner
            .run(
                self.git()
                    .args(["clone", "--recurse-submodules", url])
                    .arg(dest),
            )
            .await
            .map_err(|source| AcquireError::Clone {
                url: url.to_string(),
                source,
            })?;

        runner
            .run(
                self.git()
                    .args(["checkout", "--quiet", revision])
                    .current_dir(dest),
            )
            .await
            .map_err(|source| AcquireError::Checkout {
                revision: revision.to_string(),
                source,
            })?;

        runner
            .run(
                self.git()
                    .args(["submodule", "update", "--init", "--recursive"])
                    .current_dir(dest),
            )
            .await
            .map_err(|source| AcquireError::SubmoduleSync {
                revision: revision.to_string(),
                source,
            })?;

        Ok(())
    }
}
