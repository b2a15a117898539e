//! Core data model definitions shared across Fundamental crates.
#![allow(missing_docs)]

pub mod author;
pub mod ids;
pub mod library;
pub mod scheduling;
pub mod tasks;

// Intentionally curated re-exports for downstream consumers.
pub use author::{
    AuthorAlternateName, AuthorLink, AuthorMapping, AuthorMetadata,
    AuthorPhoto, AuthorRemoteId, AuthorSimilarity, AuthorWork, MatchMethod,
    WorkSubject,
};
pub use ids::{AuthorMetadataId, LibraryId, TaskId};
pub use library::Library;
pub use scheduling::ScheduledJobDefinition;
pub use tasks::{Task, TaskStatistics, TaskStatus, TaskType};
