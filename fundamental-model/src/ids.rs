//! Identifier newtypes for the primary entities.
//!
//! Database-assigned integer keys; wrapping them keeps a task id from being
//! handed to an API that wants a library id.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a persisted task row.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for TaskId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of a registered library.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LibraryId(pub i64);

impl LibraryId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LibraryId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// Identifier of an author metadata row.
#[derive(
    Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AuthorMetadataId(pub i64);

impl AuthorMetadataId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for AuthorMetadataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AuthorMetadataId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}
