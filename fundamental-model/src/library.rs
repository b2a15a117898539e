//! Library handle to an external Calibre catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::LibraryId;

/// Logical handle to an external book catalog.
///
/// At most one library is active at a time; the store enforces the
/// invariant when activating.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    /// Directory containing the Calibre database.
    pub calibre_db_path: String,
    /// Database file name inside `calibre_db_path`, usually `metadata.db`.
    pub calibre_db_file: String,
    pub uuid: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    /// Full path to the catalog database file.
    pub fn database_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.calibre_db_path).join(&self.calibre_db_file)
    }
}
