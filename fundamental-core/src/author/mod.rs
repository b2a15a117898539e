//! Author metadata services outside the scan pipeline.

use std::sync::Arc;

use tracing::info;

use fundamental_model::{AuthorMetadataId, MatchMethod};

use crate::datasource::{DataSourceConfig, DataSourceRegistry};
use crate::error::{CoreError, Result};
use crate::matching::MatchResult;
use crate::store::{AuthorIngest, LibraryStore};

/// Manual, single-author metadata refresh.
///
/// Runs the ingest path for one provider key with staleness disabled,
/// recorded as a `manual_refresh` match.
pub struct AuthorMetadataService {
    libraries: Arc<dyn LibraryStore>,
    ingest: Arc<dyn AuthorIngest>,
    registry: DataSourceRegistry,
}

impl std::fmt::Debug for AuthorMetadataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorMetadataService")
            .field("registry", &self.registry)
            .finish()
    }
}

impl AuthorMetadataService {
    pub fn new(
        libraries: Arc<dyn LibraryStore>,
        ingest: Arc<dyn AuthorIngest>,
        registry: DataSourceRegistry,
    ) -> Self {
        Self {
            libraries,
            ingest,
            registry,
        }
    }

    /// Fetch the latest data for one author and update the stored
    /// metadata graph. Requires an active library.
    pub async fn refresh_author(&self, external_key: &str) -> Result<AuthorMetadataId> {
        let library = self
            .libraries
            .get_active()
            .await?
            .ok_or_else(|| CoreError::NotFound("no active library".to_string()))?;

        let source = self.registry.create_source(&DataSourceConfig::default())?;

        let author_data = source.get_author(external_key).await?.ok_or_else(|| {
            CoreError::NotFound(format!(
                "could not fetch author data for key: {external_key}"
            ))
        })?;

        // Forced refresh: no cap on works, no staleness gate.
        let work_keys = source.get_author_works(external_key, None, "eng").await?;

        let result = MatchResult {
            confidence_score: 1.0,
            matched_entity: author_data.clone(),
            match_method: MatchMethod::ManualRefresh,
            calibre_author_id: None,
        };

        let metadata_id = self
            .ingest
            .ingest_author(&result, &author_data, &work_keys)
            .await?;

        info!(
            "Refreshed author {} ({}) in library {}",
            author_data.name, external_key, library.id
        );
        Ok(metadata_id)
    }
}
