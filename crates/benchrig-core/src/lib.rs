//! Core of the benchrig benchmark suite.
//!
//! Harnesses fetch, build and run third-party projects as benchmarks. This
//! crate provides the [`harness::Harness`] contract plus the building
//! blocks every harness is written with:
//!
//! - [`env`]: immutable environment snapshots and overlays
//! - [`process`]: invocations and the [`process::Runner`] seam
//! - [`source`]: pinned git acquisition
//! - [`pipeline`]: ordered build steps with scoped cleanup
//! - [`runloop`]: benchmark variants with scratch purging
//! - [`suite`]: the driver that sequences harness lifecycles

pub mod config;
pub mod env;
pub mod fsops;
pub mod harness;
pub mod pipeline;
pub mod process;
pub mod runloop;
pub mod source;
pub mod suite;

pub use config::{Config, Toolchain};
pub use env::{Env, EnvEdit, EnvError};
pub use harness::{BuildSpec, GetSpec, Harness, HarnessError, HarnessRegistry, RunSpec, default_registry};
pub use process::{Invocation, Output, ProcessError, ProcessRunner, Runner};
