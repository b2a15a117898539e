//! Author metadata graph.
//!
//! Enriched author information fetched from external data sources, linked
//! to Calibre-side authors through [`AuthorMapping`]. This data lives
//! outside the Calibre catalog database.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AuthorMetadataId, LibraryId};
use crate::tasks::UnknownVariant;

/// How an author mapping was established. Persisted as a string in
/// `author_mappings.matched_by`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Identifier,
    Exact,
    ExactAlternate,
    Fuzzy,
    DirectKey,
    Unmatched,
    Manual,
    ManualRefresh,
    NameExact,
    NameFuzzy,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMethod::Identifier => "identifier",
            MatchMethod::Exact => "exact",
            MatchMethod::ExactAlternate => "exact_alternate",
            MatchMethod::Fuzzy => "fuzzy",
            MatchMethod::DirectKey => "direct_key",
            MatchMethod::Unmatched => "unmatched",
            MatchMethod::Manual => "manual",
            MatchMethod::ManualRefresh => "manual_refresh",
            MatchMethod::NameExact => "name_exact",
            MatchMethod::NameFuzzy => "name_fuzzy",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identifier" => Ok(MatchMethod::Identifier),
            "exact" => Ok(MatchMethod::Exact),
            "exact_alternate" => Ok(MatchMethod::ExactAlternate),
            "fuzzy" => Ok(MatchMethod::Fuzzy),
            "direct_key" => Ok(MatchMethod::DirectKey),
            "unmatched" => Ok(MatchMethod::Unmatched),
            "manual" => Ok(MatchMethod::Manual),
            "manual_refresh" => Ok(MatchMethod::ManualRefresh),
            "name_exact" => Ok(MatchMethod::NameExact),
            "name_fuzzy" => Ok(MatchMethod::NameFuzzy),
            other => Err(UnknownVariant {
                kind: "match method",
                value: other.to_string(),
            }),
        }
    }
}

/// Primary author entity keyed by the external provider key.
///
/// A null `external_key` denotes an unmatched placeholder: matching was
/// attempted for some Calibre author and failed, which is distinct from
/// "never attempted".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorMetadata {
    pub id: AuthorMetadataId,
    pub external_key: Option<String>,
    pub name: String,
    pub personal_name: Option<String>,
    pub fuller_name: Option<String>,
    pub title: Option<String>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub entity_type: Option<String>,
    pub biography: Option<String>,
    pub location: Option<String>,
    pub photo_url: Option<String>,
    pub work_count: Option<i32>,
    pub ratings_average: Option<f64>,
    pub ratings_count: Option<i32>,
    pub top_work: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl AuthorMetadata {
    pub fn is_unmatched_placeholder(&self) -> bool {
        self.external_key.is_none()
    }
}

/// External identifier (VIAF, Goodreads, Wikidata, ...) owned by an author.
/// Unique per `(author_metadata_id, identifier_type)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorRemoteId {
    pub id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub identifier_type: String,
    pub identifier_value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorPhoto {
    pub id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub remote_photo_id: Option<i64>,
    pub photo_url: Option<String>,
    pub is_primary: bool,
    pub position: i32,
}

/// Pen names and name variations. Unique per `(author_metadata_id, name)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorAlternateName {
    pub id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorLink {
    pub id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub title: String,
    pub url: String,
    pub link_type: Option<String>,
}

/// Work key owned by an author, ranked by popularity. Unique per
/// `(author_metadata_id, work_key)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorWork {
    pub id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub work_key: String,
    pub rank: i32,
}

/// Subject/genre attached to a work. Unique per `(author_work_id,
/// subject_name)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkSubject {
    pub id: i64,
    pub author_work_id: i64,
    pub subject_name: String,
    pub rank: i32,
}

/// Association between a Calibre author and an [`AuthorMetadata`] row in a
/// specific library.
///
/// A mapping is a *valid match* when `matched_by != Unmatched` and the
/// linked metadata has a non-null external key; valid matches gate
/// re-matching during scans.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorMapping {
    pub id: i64,
    pub calibre_author_id: i64,
    pub author_metadata_id: AuthorMetadataId,
    pub library_id: LibraryId,
    pub confidence_score: Option<f64>,
    pub is_verified: bool,
    pub matched_by: Option<MatchMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Directed similarity edge between two author metadata rows. Unique per
/// `(author1_id, author2_id)`; iteration always goes through explicit
/// queries rather than entity navigation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthorSimilarity {
    pub id: i64,
    pub author1_id: AuthorMetadataId,
    pub author2_id: AuthorMetadataId,
    pub similarity_score: f64,
    pub similarity_source: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_method_round_trips_through_strings() {
        for method in [
            MatchMethod::Identifier,
            MatchMethod::Exact,
            MatchMethod::ExactAlternate,
            MatchMethod::Fuzzy,
            MatchMethod::DirectKey,
            MatchMethod::Unmatched,
            MatchMethod::Manual,
            MatchMethod::ManualRefresh,
            MatchMethod::NameExact,
            MatchMethod::NameFuzzy,
        ] {
            assert_eq!(method.as_str().parse::<MatchMethod>().unwrap(), method);
        }
    }

    #[test]
    fn null_external_key_marks_a_placeholder() {
        let metadata = AuthorMetadata {
            id: AuthorMetadataId(1),
            external_key: None,
            name: "Unknown Author".into(),
            personal_name: None,
            fuller_name: None,
            title: None,
            birth_date: None,
            death_date: None,
            entity_type: None,
            biography: None,
            location: None,
            photo_url: None,
            work_count: None,
            ratings_average: None,
            ratings_count: None,
            top_work: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_synced_at: None,
        };
        assert!(metadata.is_unmatched_placeholder());
    }
}
