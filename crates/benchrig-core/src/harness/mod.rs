//! Harness interface for benchmarked projects.
//!
//! This module defines the [`Harness`] trait that every project recipe
//! implements, the stage inputs ([`GetSpec`], [`BuildSpec`], [`RunSpec`]),
//! the shared [`HarnessError`], and the [`HarnessRegistry`] for lookup by
//! name.
//!
//! # Architecture
//!
//! ```text
//! Suite driver
//!     |
//!     v
//! HarnessRegistry --get("cockroachdb")--> &dyn Harness
//!                                             |
//!     check_prerequisites() ------------------+
//!     get(cfg, GetSpec)        -> GitAcquirer
//!     build(cfg, BuildSpec)    -> Pipeline  -> Runner
//!     run(cfg, RunSpec)        -> RunLoop   -> Runner
//! ```

pub mod cockroachdb;
pub mod registry;
pub mod trait_def;
pub mod types;

// Re-export the primary public API at the module level.
pub use cockroachdb::CockroachDb;
pub use registry::{HarnessRegistry, default_registry};
pub use trait_def::Harness;
pub use types::{BuildSpec, GetSpec, HarnessError, RunSpec};
