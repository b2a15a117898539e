//! Shared fixtures for stage tests.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use fundamental_model::{Library, LibraryId};

use crate::catalog::MockCalibreCatalog;
use crate::datasource::MockDataSource;
use crate::store::{MockAuthorIngest, MockAuthorMerger, MockAuthorStore};

use super::context::{NoopProgress, ScanContext};

pub(crate) fn library() -> Library {
    Library {
        id: LibraryId(1),
        name: "Main".to_string(),
        calibre_db_path: "/books".to_string(),
        calibre_db_file: "metadata.db".to_string(),
        uuid: None,
        is_active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Context over mocks; callers configure expectations before building.
pub(crate) fn context(
    authors: MockAuthorStore,
    ingest: MockAuthorIngest,
    source: MockDataSource,
) -> ScanContext {
    ScanContext::new(
        library(),
        Arc::new(authors),
        Arc::new(ingest),
        Arc::new(MockAuthorMerger::new()),
        Arc::new(MockCalibreCatalog::new()),
        Arc::new(source),
        Arc::new(NoopProgress),
        CancellationToken::new(),
    )
}
