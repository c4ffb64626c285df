//! Name-to-harness lookup for the suite driver.
//!
//! Names are matched exactly as typed on the command line. Recipes stay
//! behind the [`Harness`] trait.

use std::collections::BTreeMap;

use super::cockroachdb::CockroachDb;
use super::trait_def::Harness;

/// Harnesses keyed by [`Harness::name`], iterated in name order.
#[derive(Default)]
pub struct HarnessRegistry {
    harnesses: BTreeMap<String, Box<dyn Harness>>,
}

impl HarnessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `harness` under its own name, handing back any harness it
    /// displaced.
    pub fn register(&mut self, harness: impl Harness + 'static) -> Option<Box<dyn Harness>> {
        let name = harness.name().to_string();
        self.harnesses.insert(name, Box::new(harness))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Harness> {
        self.harnesses.get(name).map(|h| &**h)
    }

    /// Registered names in sorted order.
    pub fn list(&self) -> Vec<&str> {
        self.harnesses.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.harnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.harnesses.is_empty()
    }
}

impl std::fmt::Debug for HarnessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessRegistry")
            .field("harnesses", &self.harnesses.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Registry with every harness shipped in this crate.
pub fn default_registry() -> HarnessRegistry {
    let mut registry = HarnessRegistry::new();
    registry.register(CockroachDb);
    registry
}
