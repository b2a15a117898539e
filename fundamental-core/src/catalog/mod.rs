//! Read access to the external Calibre catalog.
//!
//! The catalog database belongs to Calibre; the scan pipeline only reads
//! it, through this port. The crawl stage enumerates authors here and
//! everything downstream works on the application's own tables.

mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::datasource::IdentifierSet;
use crate::error::Result;

pub use sqlite::{SqliteCatalog, SqliteCatalogOpener};

/// An author row from the Calibre catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sort: Option<String>,
    /// External identifiers when known (e.g. recovered from an earlier
    /// mapping); drives the identifier matching strategy.
    #[serde(default)]
    pub identifiers: Option<IdentifierSet>,
}

impl Author {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            sort: None,
            identifiers: None,
        }
    }
}

/// Read-only view of one Calibre catalog database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalibreCatalog: Send + Sync {
    /// All authors in the catalog, in id order.
    async fn list_authors(&self) -> Result<Vec<Author>>;

    /// Number of books attributed to an author.
    async fn count_books_for_author(&self, author_id: i64) -> Result<i64>;
}

/// Opens catalogs on demand; scan workers receive the catalog path inside
/// each job message.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogOpener: Send + Sync {
    async fn open(
        &self,
        db_path: &str,
        db_file: &str,
    ) -> Result<std::sync::Arc<dyn CalibreCatalog>>;
}
