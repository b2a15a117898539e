//! Persistence layer.
//!
//! Ports (traits) describe what the runtime, scheduler, matching, and
//! scan stages need from storage; the `postgres` module holds the
//! production implementations and `memory` an in-process task store used
//! by tests and by embedded deployments without Postgres.

pub mod memory;
mod ports;
pub mod postgres;

pub use memory::MemoryTaskStore;
pub use ports::{
    AuthorIngest, AuthorMerger, AuthorStore, LibraryStore, MappingData,
    ScheduledJobStore, TaskFilter, TaskStore, UserStore,
};
#[cfg(test)]
pub use ports::{
    MockAuthorIngest, MockAuthorMerger, MockAuthorStore, MockLibraryStore,
    MockScheduledJobStore, MockTaskStore, MockUserStore,
};
pub use postgres::{
    PgAuthorIngest, PgAuthorStore, PgLibraryStore, PgScheduledJobStore,
    PgTaskStore, PgUserStore, run_migrations,
};
