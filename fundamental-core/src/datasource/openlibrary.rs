//! OpenLibrary HTTP data source.
//!
//! Enforces a minimum delay between successive requests and maps HTTP
//! failures onto the shared [`DataSourceError`] taxonomy.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::types::{AuthorData, AuthorLinkData, BookData, IdentifierSet};
use super::{DataSource, DataSourceError, SourceResult};

const DEFAULT_BASE_URL: &str = "https://openlibrary.org";
const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PHOTO_BASE_URL: &str = "https://covers.openlibrary.org/a/id";

/// Rate-limited HTTP backend against the OpenLibrary API.
pub struct OpenLibraryDataSource {
    client: reqwest::Client,
    base_url: String,
    rate_limit_delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for OpenLibraryDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenLibraryDataSource")
            .field("base_url", &self.base_url)
            .field("rate_limit_delay", &self.rate_limit_delay)
            .finish()
    }
}

impl OpenLibraryDataSource {
    pub fn new() -> SourceResult<Self> {
        Self::with_options(DEFAULT_BASE_URL, DEFAULT_RATE_LIMIT_DELAY)
    }

    pub fn with_options(base_url: &str, rate_limit_delay: Duration) -> SourceResult<Self> {
        let base = url::Url::parse(base_url)
            .map_err(|e| DataSourceError::Network(format!("invalid base url: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("fundamental/0.1 (library metadata sync)")
            .build()
            .map_err(|e| DataSourceError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base.as_str().trim_end_matches('/').to_string(),
            rate_limit_delay,
            last_request: Mutex::new(None),
        })
    }

    /// Delay so that successive requests stay at least `rate_limit_delay`
    /// apart.
    async fn rate_limit(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let since = previous.elapsed();
            if since < self.rate_limit_delay {
                tokio::time::sleep(self.rate_limit_delay - since).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> SourceResult<Value> {
        self.rate_limit().await;

        let url = format!("{}{}", self.base_url, path);
        debug!("OpenLibrary request: {} {:?}", url, query);

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| DataSourceError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(DataSourceError::RateLimit),
            StatusCode::NOT_FOUND => Err(DataSourceError::NotFound(url)),
            status if !status.is_success() => Err(DataSourceError::Network(format!(
                "unexpected status {status} for {url}"
            ))),
            _ => response
                .json()
                .await
                .map_err(|e| DataSourceError::InvalidResponse(e.to_string())),
        }
    }

    fn parse_author_doc(doc: &Value) -> Option<AuthorData> {
        let key = normalize_author_key(doc.get("key")?.as_str()?);
        parse_author_document(&key, doc)
    }

    fn parse_book_doc(doc: &Value, skip_authors: bool) -> Option<BookData> {
        let key = doc.get("key")?.as_str()?.to_string();
        let title = doc.get("title")?.as_str()?.to_string();

        let mut isbns = string_list(doc, "isbn");
        let isbn13 = isbns
            .iter()
            .position(|i| i.len() == 13)
            .map(|i| isbns.remove(i));

        Some(BookData {
            key,
            title,
            authors: if skip_authors {
                Vec::new()
            } else {
                string_list(doc, "author_name")
            },
            isbn: isbns.into_iter().next(),
            isbn13,
            publish_date: doc
                .get("first_publish_year")
                .and_then(Value::as_i64)
                .map(|y| y.to_string()),
            publishers: string_list(doc, "publisher"),
            subjects: string_list(doc, "subject"),
            description: extract_bio(doc),
            cover_url: doc
                .get("cover_i")
                .and_then(Value::as_i64)
                .map(|id| format!("https://covers.openlibrary.org/b/id/{id}-L.jpg")),
        })
    }

    /// Public photo URL for an OpenLibrary photo id.
    pub fn photo_url(photo_id: i64) -> String {
        format!("{PHOTO_BASE_URL}/{photo_id}-L.jpg")
    }
}

/// Build [`AuthorData`] from a provider author document. The key is taken
/// from the caller because dump rows carry it in a column.
pub(super) fn parse_author_document(key: &str, doc: &Value) -> Option<AuthorData> {
    let name = doc.get("name")?.as_str()?.to_string();

    Some(AuthorData {
        key: key.to_string(),
        name,
        personal_name: string_field(doc, "personal_name"),
        fuller_name: string_field(doc, "fuller_name"),
        title: string_field(doc, "title"),
        birth_date: string_field(doc, "birth_date"),
        death_date: string_field(doc, "death_date"),
        entity_type: string_field(doc, "entity_type"),
        biography: extract_bio(doc),
        location: string_field(doc, "location"),
        photo_ids: int_list(doc, "photos"),
        alternate_names: string_list(doc, "alternate_names"),
        links: extract_links(doc),
        identifiers: extract_identifiers(doc),
        work_count: doc
            .get("work_count")
            .and_then(Value::as_i64)
            .map(|n| n as i32),
        ratings_average: doc.get("ratings_average").and_then(Value::as_f64),
        ratings_count: doc
            .get("ratings_count")
            .and_then(Value::as_i64)
            .map(|n| n as i32),
        top_work: string_field(doc, "top_work"),
        subjects: string_list(doc, "top_subjects"),
    })
}

/// Build [`BookData`] from a work document as stored in the dump tables.
pub(super) fn parse_work_document(key: &str, doc: &Value) -> Option<BookData> {
    let title = doc.get("title")?.as_str()?.to_string();

    let isbn10 = string_list(doc, "isbn_10").into_iter().next();
    let isbn13 = string_list(doc, "isbn_13").into_iter().next();

    Some(BookData {
        key: key.to_string(),
        title,
        authors: string_list(doc, "author_names"),
        isbn: isbn10,
        isbn13,
        publish_date: string_field(doc, "first_publish_date"),
        publishers: string_list(doc, "publishers"),
        subjects: string_list(doc, "subjects"),
        description: extract_description(doc),
        cover_url: doc
            .get("covers")
            .and_then(Value::as_array)
            .and_then(|covers| covers.first())
            .and_then(Value::as_i64)
            .filter(|id| *id > 0)
            .map(|id| format!("https://covers.openlibrary.org/b/id/{id}-L.jpg")),
    })
}

/// Descriptions use the same string-or-typed-object shape as biographies.
fn extract_description(doc: &Value) -> Option<String> {
    match doc.get("description") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Object(map)) => map
            .get("value")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
}

fn string_field(doc: &Value, field: &str) -> Option<String> {
    doc.get(field)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn string_list(doc: &Value, field: &str) -> Vec<String> {
    doc.get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn int_list(doc: &Value, field: &str) -> Vec<i64> {
    doc.get(field)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_i64).filter(|n| *n > 0).collect())
        .unwrap_or_default()
}

/// Biography comes back either as a bare string or as a typed
/// `{type, value}` object.
fn extract_bio(doc: &Value) -> Option<String> {
    match doc.get("bio") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Object(map)) => map
            .get("value")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        _ => None,
    }
}

fn extract_links(doc: &Value) -> Vec<AuthorLinkData> {
    doc.get("links")
        .and_then(Value::as_array)
        .map(|links| {
            links
                .iter()
                .filter_map(|link| {
                    Some(AuthorLinkData {
                        title: string_field(link, "title")?,
                        url: string_field(link, "url")?,
                        link_type: link
                            .get("type")
                            .and_then(|t| t.get("key"))
                            .and_then(Value::as_str)
                            .map(ToString::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn extract_identifiers(doc: &Value) -> Option<IdentifierSet> {
    let remote = doc.get("remote_ids")?.as_object()?;
    let pick = |field: &str| remote.get(field).and_then(Value::as_str).map(ToString::to_string);

    let identifiers = IdentifierSet {
        viaf: pick("viaf"),
        goodreads: pick("goodreads"),
        wikidata: pick("wikidata"),
        isni: pick("isni"),
        librarything: pick("librarything"),
        amazon: pick("amazon"),
        imdb: pick("imdb"),
        musicbrainz: pick("musicbrainz"),
        lc_naf: pick("lc_naf"),
        opac_sbn: pick("opac_sbn"),
        storygraph: pick("storygraph"),
    };
    (!identifiers.is_empty()).then_some(identifiers)
}

/// Author keys appear both as `/authors/OL23919A` and bare `OL23919A`.
fn normalize_author_key(key: &str) -> String {
    key.rsplit('/').next().unwrap_or(key).to_string()
}

#[async_trait]
impl DataSource for OpenLibraryDataSource {
    fn name(&self) -> &str {
        "openlibrary"
    }

    async fn search_author<'a>(
        &self,
        name: &str,
        _identifiers: Option<&'a IdentifierSet>,
    ) -> SourceResult<Vec<AuthorData>> {
        let body = self
            .get_json("/search/authors.json", &[("q", name.to_string())])
            .await?;

        Ok(body
            .get("docs")
            .and_then(Value::as_array)
            .map(|docs| docs.iter().filter_map(Self::parse_author_doc).collect())
            .unwrap_or_default())
    }

    async fn get_author(&self, key: &str) -> SourceResult<Option<AuthorData>> {
        let key = normalize_author_key(key);
        match self.get_json(&format!("/authors/{key}.json"), &[]).await {
            Ok(doc) => Ok(Self::parse_author_doc(&doc)),
            Err(DataSourceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn get_author_works(
        &self,
        author_key: &str,
        limit: Option<usize>,
        _lang: &str,
    ) -> SourceResult<Vec<String>> {
        let key = normalize_author_key(author_key);
        let page_size = limit.unwrap_or(1000).min(1000);
        let body = self
            .get_json(
                &format!("/authors/{key}/works.json"),
                &[("limit", page_size.to_string())],
            )
            .await?;

        let mut keys: Vec<String> = body
            .get("entries")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("key").and_then(Value::as_str))
                    .map(|key| key.rsplit('/').next().unwrap_or(key).to_string())
                    .collect()
            })
            .unwrap_or_default();

        if let Some(limit) = limit {
            keys.truncate(limit);
        }
        Ok(keys)
    }

    async fn search_book<'a>(
        &self,
        title: Option<&'a str>,
        isbn: Option<&'a str>,
        authors: Option<&'a [String]>,
    ) -> SourceResult<Vec<BookData>> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(title) = title {
            query.push(("title", title.to_string()));
        }
        if let Some(isbn) = isbn {
            query.push(("isbn", isbn.to_string()));
        }
        if let Some(authors) = authors
            && !authors.is_empty()
        {
            query.push(("author", authors.join(" ")));
        }
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.get_json("/search.json", &query).await?;
        Ok(body
            .get("docs")
            .and_then(Value::as_array)
            .map(|docs| {
                docs.iter()
                    .filter_map(|doc| Self::parse_book_doc(doc, false))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_book(&self, key: &str, skip_authors: bool) -> SourceResult<Option<BookData>> {
        let path = if key.starts_with('/') {
            format!("{key}.json")
        } else {
            format!("/works/{key}.json")
        };
        match self.get_json(&path, &[]).await {
            Ok(doc) => Ok(Self::parse_book_doc(&doc, skip_authors)),
            Err(DataSourceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_keys_are_normalized() {
        assert_eq!(normalize_author_key("/authors/OL23919A"), "OL23919A");
        assert_eq!(normalize_author_key("OL23919A"), "OL23919A");
    }

    #[test]
    fn bio_handles_both_shapes() {
        let plain = serde_json::json!({"bio": "A writer."});
        let typed = serde_json::json!({"bio": {"type": "/type/text", "value": "Typed."}});
        let missing = serde_json::json!({});

        assert_eq!(extract_bio(&plain).as_deref(), Some("A writer."));
        assert_eq!(extract_bio(&typed).as_deref(), Some("Typed."));
        assert_eq!(extract_bio(&missing), None);
    }

    #[test]
    fn parses_author_doc_with_identifiers() {
        let doc = serde_json::json!({
            "key": "/authors/OL23919A",
            "name": "J. K. Rowling",
            "alternate_names": ["Robert Galbraith"],
            "work_count": 411,
            "remote_ids": {"viaf": "116796842", "wikidata": "Q34660"},
        });

        let author = OpenLibraryDataSource::parse_author_doc(&doc).unwrap();
        assert_eq!(author.key, "OL23919A");
        assert_eq!(author.alternate_names, vec!["Robert Galbraith"]);
        assert_eq!(author.work_count, Some(411));
        let ids = author.identifiers.unwrap();
        assert_eq!(ids.viaf.as_deref(), Some("116796842"));
        assert_eq!(ids.wikidata.as_deref(), Some("Q34660"));
    }

    #[tokio::test]
    async fn rate_limiter_spaces_requests() {
        let source =
            OpenLibraryDataSource::with_options("http://localhost:1", Duration::from_millis(40))
                .unwrap();

        let start = Instant::now();
        source.rate_limit().await;
        source.rate_limit().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
