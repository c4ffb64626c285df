//! Process environment snapshots and overlays.
//!
//! An [`Env`] is an immutable snapshot of key/value pairs. Every edit
//! returns a new snapshot, so a base environment handed out by the
//! [`Config`](crate::config::Config) can be specialised per stage without
//! affecting other stages. Keys are kept in a `BTreeMap` so that
//! [`Env::collapse`] is byte-for-byte reproducible.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while parsing `KEY=VALUE` pairs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvError {
    /// The pair has no `=` separator.
    #[error("environment entry {0:?} is missing '='")]
    MissingSeparator(String),

    /// The key part of the pair is empty.
    #[error("environment entry {0:?} has an empty key")]
    EmptyKey(String),
}

/// A single edit in an environment overlay.
///
/// Overlays can be declared in the config file:
///
/// ```toml
/// [[env.build]]
/// op = "prefix"
/// key = "PATH"
/// value = "/opt/tools/bin:"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EnvEdit {
    /// Prepend `value` to the current value of `key`.
    Prefix { key: String, value: String },
    /// Set `key` only if it is not already present.
    SetIfAbsent { key: String, value: String },
    /// Overwrite `key` unconditionally.
    Set { key: String, value: String },
}

/// An immutable environment snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    /// An environment with no variables.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Snapshot the environment of the current process.
    pub fn from_process() -> Self {
        Self::from_pairs(std::env::vars())
    }

    /// Build an environment from key/value pairs. Later duplicates win.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Split a `KEY=VALUE` string. Only the first `=` separates.
    pub fn parse_pair(pair: &str) -> Result<(String, String), EnvError> {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| EnvError::MissingSeparator(pair.to_string()))?;
        if key.is_empty() {
            return Err(EnvError::EmptyKey(pair.to_string()));
        }
        Ok((key.to_string(), value.to_string()))
    }

    /// Look up a variable.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Number of variables in the snapshot.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Return `true` if the snapshot holds no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterate over variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Prepend `value` to `key`, creating it if absent.
    ///
    /// No separator is inserted; callers pass e.g. `"/opt/bin:"` for
    /// `PATH`-like variables.
    pub fn prefix(&self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        let key = key.into();
        let mut next = self.clone();
        let merged = match self.vars.get(&key) {
            Some(prev) => format!("{}{prev}", value.as_ref()),
            None => value.as_ref().to_string(),
        };
        next.vars.insert(key, merged);
        next
    }

    /// Set `key` to `value`, overwriting any previous value.
    pub fn must_set(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.vars.insert(key.into(), value.into());
        next
    }

    /// Set `key` to `value` only if `key` is absent.
    pub fn set_if_absent(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.vars.entry(key.into()).or_insert_with(|| value.into());
        next
    }

    /// Remove `key` if present.
    pub fn unset(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.vars.remove(key);
        next
    }

    /// Apply a single overlay edit.
    pub fn edit(&self, edit: &EnvEdit) -> Self {
        match edit {
            EnvEdit::Prefix { key, value } => self.prefix(key.as_str(), value),
            EnvEdit::SetIfAbsent { key, value } => self.set_if_absent(key.as_str(), value.as_str()),
            EnvEdit::Set { key, value } => self.must_set(key.as_str(), value.as_str()),
        }
    }

    /// Apply overlay edits in declaration order.
    pub fn apply<'a>(&self, edits: impl IntoIterator<Item = &'a EnvEdit>) -> Self {
        edits.into_iter().fold(self.clone(), |env, e| env.edit(e))
    }

    /// Flatten into `KEY=VALUE` entries, sorted by key.
    pub fn collapse(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}
