//! Identity and versioning types for event streams.
//!
//! Every aggregate instance owns exactly one stream. The stream name is
//! derived deterministically from the aggregate kind and id, so the same
//! aggregate always maps to the same stream on every node.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for id parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid identifier: {0}")]
pub struct ParseIdError(String);

/// Opaque, stable identifier of an aggregate instance.
///
/// The id is treated as an opaque string; the runtime never interprets its
/// contents beyond equality and hashing.
///
/// # Examples
///
/// ```
/// use stela_core::stream::AggregateId;
///
/// let id = AggregateId::new("invoice-1");
/// assert_eq!(id.as_str(), "invoice-1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId(String);

impl AggregateId {
    /// Create a new `AggregateId` from a string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert the `AggregateId` into its inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseIdError("aggregate id cannot be empty".to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique name of an event stream in the log.
///
/// Derived deterministically from aggregate kind + id via
/// [`StreamId::for_aggregate`], e.g. `"invoice-a7"` for kind `"invoice"`
/// and id `"a7"`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    /// Create a `StreamId` from a raw string.
    ///
    /// Prefer [`StreamId::for_aggregate`] for streams owned by aggregates so
    /// the derivation stays uniform across the codebase.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the stream name for an aggregate instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use stela_core::stream::{AggregateId, StreamId};
    ///
    /// let stream = StreamId::for_aggregate("invoice", &AggregateId::new("1"));
    /// assert_eq!(stream.as_str(), "invoice-1");
    /// ```
    #[must_use]
    pub fn for_aggregate(kind: &str, id: &AggregateId) -> Self {
        Self(format!("{kind}-{id}"))
    }

    /// Get the stream name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this stream belongs to the given aggregate kind.
    #[must_use]
    pub fn has_kind(&self, kind: &str) -> bool {
        self.0
            .strip_prefix(kind)
            .is_some_and(|rest| rest.starts_with('-'))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Per-stream event version for optimistic concurrency control.
///
/// Versions start at 0 for an empty stream and increase by exactly 1 per
/// committed event. An append carries the expected current version; when it
/// disagrees with the persisted version, the append fails and commits
/// nothing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of an empty stream.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next version (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Check if this is the initial version (0).
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

impl std::ops::Add<u64> for Version {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

/// Global commit-order position in the event log.
///
/// Unlike [`Version`], which is per stream, a `Position` totally orders all
/// committed events across every stream. Consumers checkpoint positions,
/// not versions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position(u64);

impl Position {
    /// The position before the first event in the log.
    pub const START: Self = Self(0);

    /// Create a new `Position` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the position value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Get the next position (current + 1).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(position: Position) -> Self {
        position.0
    }
}
