//! Logical request identifiers.
//!
//! Identifier format: `prefix` immediately followed by a counter value,
//! e.g. `hierarchymodule12`. The prefix is usually the target module name;
//! requests without one use [`DEFAULT_PREFIX`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix used when a request id is generated without one.
pub const DEFAULT_PREFIX: &str = "z-gen";

/// Identifier of one logical request, unique for the lifetime of its generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an already-formatted identifier (e.g. one read back from a response).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Generates [`RequestId`]s from a single counter shared by all prefixes.
///
/// The counter never goes backwards, so an id is never handed out twice by
/// the same generator, even across envelope resets.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: u64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next identifier, using [`DEFAULT_PREFIX`] if `prefix` is `None` or empty.
    pub fn next(&mut self, prefix: Option<&str>) -> RequestId {
        self.last += 1;
        let prefix = prefix.filter(|p| !p.is_empty()).unwrap_or(DEFAULT_PREFIX);
        RequestId(format!("{prefix}{}", self.last))
    }

    /// The number of identifiers generated so far.
    pub fn issued(&self) -> u64 {
        self.last
    }
}
