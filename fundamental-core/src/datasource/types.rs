//! Normalized response types shared by all data sources.

use serde::{Deserialize, Serialize};

/// External identifiers for an author, keyed by identifier system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierSet {
    pub viaf: Option<String>,
    pub goodreads: Option<String>,
    pub wikidata: Option<String>,
    pub isni: Option<String>,
    pub librarything: Option<String>,
    pub amazon: Option<String>,
    pub imdb: Option<String>,
    pub musicbrainz: Option<String>,
    pub lc_naf: Option<String>,
    pub opac_sbn: Option<String>,
    pub storygraph: Option<String>,
}

impl IdentifierSet {
    /// `(type, value)` pairs for the identifiers that are present.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("viaf", &self.viaf),
            ("goodreads", &self.goodreads),
            ("wikidata", &self.wikidata),
            ("isni", &self.isni),
            ("librarything", &self.librarything),
            ("amazon", &self.amazon),
            ("imdb", &self.imdb),
            ("musicbrainz", &self.musicbrainz),
            ("lc_naf", &self.lc_naf),
            ("opac_sbn", &self.opac_sbn),
            ("storygraph", &self.storygraph),
        ]
        .iter()
        .filter_map(|(kind, value)| value.as_deref().map(|v| (*kind, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Whether any identifier present in both sets has the same value.
    pub fn shares_identifier_with(&self, other: &IdentifierSet) -> bool {
        let theirs = other.entries();
        self.entries()
            .iter()
            .any(|(kind, value)| theirs.iter().any(|(k, v)| k == kind && v == value))
    }
}

/// Author data from an external source, shaped for the author-metadata
/// graph.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorData {
    pub key: String,
    pub name: String,
    pub personal_name: Option<String>,
    pub fuller_name: Option<String>,
    pub title: Option<String>,
    pub birth_date: Option<String>,
    pub death_date: Option<String>,
    pub entity_type: Option<String>,
    pub biography: Option<String>,
    pub location: Option<String>,
    pub photo_ids: Vec<i64>,
    pub alternate_names: Vec<String>,
    pub links: Vec<AuthorLinkData>,
    pub identifiers: Option<IdentifierSet>,
    pub work_count: Option<i32>,
    pub ratings_average: Option<f64>,
    pub ratings_count: Option<i32>,
    pub top_work: Option<String>,
    pub subjects: Vec<String>,
}

/// External link attached to an author record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorLinkData {
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub link_type: Option<String>,
}

/// Book data from an external source.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookData {
    pub key: String,
    pub title: String,
    pub authors: Vec<String>,
    pub isbn: Option<String>,
    pub isbn13: Option<String>,
    pub publish_date: Option<String>,
    pub publishers: Vec<String>,
    pub subjects: Vec<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
}
