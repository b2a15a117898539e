//! End-to-end distributed scan over the in-memory broker.
//!
//! Exercises the full worker chain (crawl → match → ingest → link →
//! score → completion) with fake stores, covering the happy path and
//! mid-scan cancellation.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fundamental_config::ScanConfig;
use fundamental_core::catalog::{Author, CalibreCatalog, CatalogOpener};
use fundamental_core::datasource::{
    AuthorData, DataSource, DataSourceRegistry, IdentifierSet, SourceResult,
};
use fundamental_core::error::Result;
use fundamental_core::matching::MatchResult;
use fundamental_core::messaging::{MemoryBroker, ScanBroker};
use fundamental_core::model::{
    AuthorMapping, AuthorMetadata, AuthorMetadataId, Library, LibraryId,
    MatchMethod, TaskId, TaskStatus, TaskType,
};
use fundamental_core::store::{
    AuthorIngest, AuthorMerger, AuthorStore, LibraryStore, MappingData,
    MemoryTaskStore, TaskStore,
};
use fundamental_core::workers::{
    JobProgressTracker, LibraryScanningService, ScanWorkerManager,
    WorkerDependencies,
};

// ---------------------------------------------------------------------
// Fakes

fn blank_metadata(id: i64, key: Option<&str>, name: &str) -> AuthorMetadata {
    AuthorMetadata {
        id: AuthorMetadataId(id),
        external_key: key.map(ToString::to_string),
        name: name.to_string(),
        personal_name: None,
        fuller_name: None,
        title: None,
        birth_date: None,
        death_date: None,
        entity_type: None,
        biography: None,
        location: None,
        photo_url: None,
        work_count: Some(5),
        ratings_average: None,
        ratings_count: None,
        top_work: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
        last_synced_at: Some(Utc::now()),
    }
}

#[derive(Default)]
struct GraphState {
    next_id: i64,
    metadata: Vec<AuthorMetadata>,
    mappings: Vec<AuthorMapping>,
    similarities: Vec<(i64, i64, f64)>,
}

/// In-memory author graph shared by the fake store and fake ingester.
#[derive(Default)]
struct FakeGraph {
    state: Mutex<GraphState>,
}

impl FakeGraph {
    fn mappings(&self) -> Vec<AuthorMapping> {
        self.state.lock().unwrap().mappings.clone()
    }

    fn metadata(&self) -> Vec<AuthorMetadata> {
        self.state.lock().unwrap().metadata.clone()
    }
}

struct FakeAuthorStore(Arc<FakeGraph>);

#[async_trait]
impl AuthorStore for FakeAuthorStore {
    async fn find_mapping_with_metadata(
        &self,
        calibre_author_id: i64,
        library_id: LibraryId,
    ) -> Result<Option<(AuthorMapping, AuthorMetadata)>> {
        let state = self.0.state.lock().unwrap();
        let mapping = state
            .mappings
            .iter()
            .find(|m| m.calibre_author_id == calibre_author_id && m.library_id == library_id)
            .cloned();
        Ok(mapping.and_then(|mapping| {
            state
                .metadata
                .iter()
                .find(|m| m.id == mapping.author_metadata_id)
                .cloned()
                .map(|metadata| (mapping, metadata))
        }))
    }

    async fn get_metadata(&self, id: AuthorMetadataId) -> Result<Option<AuthorMetadata>> {
        Ok(self
            .0
            .state
            .lock()
            .unwrap()
            .metadata
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn find_metadata_by_key(&self, key: &str) -> Result<Option<AuthorMetadata>> {
        Ok(self
            .0
            .state
            .lock()
            .unwrap()
            .metadata
            .iter()
            .find(|m| m.external_key.as_deref() == Some(key))
            .cloned())
    }

    async fn create_unmatched_metadata(&self, name: &str) -> Result<AuthorMetadata> {
        let mut state = self.0.state.lock().unwrap();
        state.next_id += 1;
        let metadata = blank_metadata(state.next_id, None, name);
        state.metadata.push(metadata.clone());
        Ok(metadata)
    }

    async fn rename_metadata(&self, id: AuthorMetadataId, name: &str) -> Result<()> {
        let mut state = self.0.state.lock().unwrap();
        if let Some(metadata) = state.metadata.iter_mut().find(|m| m.id == id) {
            metadata.name = name.to_string();
        }
        Ok(())
    }

    async fn upsert_mapping(&self, data: &MappingData) -> Result<(AuthorMapping, bool)> {
        let mut state = self.0.state.lock().unwrap();
        if let Some(existing) = state.mappings.iter_mut().find(|m| {
            m.calibre_author_id == data.calibre_author_id && m.library_id == data.library_id
        }) {
            existing.author_metadata_id = data.author_metadata_id;
            existing.confidence_score = Some(data.confidence_score);
            existing.matched_by = Some(data.matched_by);
            existing.updated_at = Utc::now();
            return Ok((existing.clone(), false));
        }
        state.next_id += 1;
        let mapping = AuthorMapping {
            id: state.next_id,
            calibre_author_id: data.calibre_author_id,
            author_metadata_id: data.author_metadata_id,
            library_id: data.library_id,
            confidence_score: Some(data.confidence_score),
            is_verified: false,
            matched_by: Some(data.matched_by),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.mappings.push(mapping.clone());
        Ok((mapping, true))
    }

    async fn list_metadata_for_library(
        &self,
        library_id: LibraryId,
    ) -> Result<Vec<AuthorMetadata>> {
        let state = self.0.state.lock().unwrap();
        let ids: Vec<AuthorMetadataId> = state
            .mappings
            .iter()
            .filter(|m| m.library_id == library_id)
            .map(|m| m.author_metadata_id)
            .collect();
        Ok(state
            .metadata
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn alternate_names_for(&self, _id: AuthorMetadataId) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn work_keys_for(&self, _id: AuthorMetadataId) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn subjects_for(&self, _id: AuthorMetadataId) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn upsert_similarity(
        &self,
        author1_id: AuthorMetadataId,
        author2_id: AuthorMetadataId,
        score: f64,
        _source: &str,
    ) -> Result<()> {
        self.0.state.lock().unwrap().similarities.push((
            author1_id.as_i64(),
            author2_id.as_i64(),
            score,
        ));
        Ok(())
    }

    async fn latest_similarity_at(
        &self,
        _library_id: LibraryId,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

struct FakeIngest(Arc<FakeGraph>);

#[async_trait]
impl AuthorIngest for FakeIngest {
    async fn last_synced_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .0
            .state
            .lock()
            .unwrap()
            .metadata
            .iter()
            .find(|m| m.external_key.as_deref() == Some(key))
            .and_then(|m| m.last_synced_at))
    }

    async fn ingest_author(
        &self,
        _result: &MatchResult,
        data: &AuthorData,
        _work_keys: &[String],
    ) -> Result<AuthorMetadataId> {
        let mut state = self.0.state.lock().unwrap();
        if let Some(existing) = state
            .metadata
            .iter()
            .find(|m| m.external_key.as_deref() == Some(data.key.as_str()))
        {
            return Ok(existing.id);
        }
        state.next_id += 1;
        let metadata = blank_metadata(state.next_id, Some(&data.key), &data.name);
        let id = metadata.id;
        state.metadata.push(metadata);
        Ok(id)
    }
}

#[derive(Default)]
struct FakeMerger {
    merged: Mutex<Vec<(i64, i64)>>,
}

#[async_trait]
impl AuthorMerger for FakeMerger {
    async fn merge(&self, keep: AuthorMetadataId, merge: AuthorMetadataId) -> Result<()> {
        self.merged
            .lock()
            .unwrap()
            .push((keep.as_i64(), merge.as_i64()));
        Ok(())
    }
}

struct FakeCatalog {
    authors: Vec<Author>,
}

#[async_trait]
impl CalibreCatalog for FakeCatalog {
    async fn list_authors(&self) -> Result<Vec<Author>> {
        Ok(self.authors.clone())
    }

    async fn count_books_for_author(&self, _author_id: i64) -> Result<i64> {
        Ok(0)
    }
}

struct FakeOpener {
    authors: Vec<Author>,
}

#[async_trait]
impl CatalogOpener for FakeOpener {
    async fn open(
        &self,
        _db_path: &str,
        _db_file: &str,
    ) -> Result<Arc<dyn CalibreCatalog>> {
        Ok(Arc::new(FakeCatalog {
            authors: self.authors.clone(),
        }))
    }
}

/// Every author is matchable by exact name; keys are derived from names.
struct ExactNameSource;

fn key_for(name: &str) -> String {
    format!("OL{}A", name.to_lowercase().replace(' ', "-"))
}

#[async_trait]
impl DataSource for ExactNameSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn search_author(
        &self,
        name: &str,
        _identifiers: Option<&IdentifierSet>,
    ) -> SourceResult<Vec<AuthorData>> {
        Ok(vec![AuthorData {
            key: key_for(name),
            name: name.to_string(),
            ..AuthorData::default()
        }])
    }

    async fn get_author(&self, key: &str) -> SourceResult<Option<AuthorData>> {
        Ok(Some(AuthorData {
            key: key.to_string(),
            name: "fetched".to_string(),
            ..AuthorData::default()
        }))
    }

    async fn get_author_works(
        &self,
        _author_key: &str,
        _limit: Option<usize>,
        _lang: &str,
    ) -> SourceResult<Vec<String>> {
        Ok(vec!["W1".to_string()])
    }

    async fn search_book(
        &self,
        _title: Option<&str>,
        _isbn: Option<&str>,
        _authors: Option<&[String]>,
    ) -> SourceResult<Vec<fundamental_core::datasource::BookData>> {
        Ok(Vec::new())
    }

    async fn get_book(
        &self,
        _key: &str,
        _skip_authors: bool,
    ) -> SourceResult<Option<fundamental_core::datasource::BookData>> {
        Ok(None)
    }
}

struct FakeLibraryStore {
    library: Library,
}

#[async_trait]
impl LibraryStore for FakeLibraryStore {
    async fn get(&self, id: LibraryId) -> Result<Option<Library>> {
        Ok((self.library.id == id).then(|| self.library.clone()))
    }

    async fn get_active(&self) -> Result<Option<Library>> {
        Ok(Some(self.library.clone()))
    }

    async fn list(&self) -> Result<Vec<Library>> {
        Ok(vec![self.library.clone()])
    }

    async fn set_active(&self, _id: LibraryId) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------
// Fixture

struct Fixture {
    broker: Arc<MemoryBroker>,
    store: Arc<dyn TaskStore>,
    graph: Arc<FakeGraph>,
    manager: ScanWorkerManager,
    scans: LibraryScanningService,
}

fn library() -> Library {
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

fn fixture(author_names: &[&str]) -> Fixture {
    let broker = Arc::new(MemoryBroker::new());
    let scan_broker: Arc<dyn ScanBroker> = Arc::clone(&broker) as _;

    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let graph = Arc::new(FakeGraph::default());

    let authors: Vec<Author> = author_names
        .iter()
        .enumerate()
        .map(|(idx, name)| Author::new(idx as i64 + 1, name))
        .collect();

    let mut registry = DataSourceRegistry::new();
    registry.register("fake", |_| Ok(Arc::new(ExactNameSource) as _));

    let deps = WorkerDependencies {
        store: Arc::clone(&store),
        authors: Arc::new(FakeAuthorStore(Arc::clone(&graph))),
        ingest: Arc::new(FakeIngest(Arc::clone(&graph))),
        merger: Arc::new(FakeMerger::default()),
        opener: Arc::new(FakeOpener { authors }),
        registry,
    };

    let config = ScanConfig {
        data_source: "fake".to_string(),
        ..ScanConfig::default()
    };

    let manager = ScanWorkerManager::new(Arc::clone(&scan_broker), deps, config);
    let scans = LibraryScanningService::new(
        Arc::clone(&store),
        Arc::new(FakeLibraryStore { library: library() }),
        Arc::clone(&scan_broker),
    );

    Fixture {
        broker,
        store,
        graph,
        manager,
        scans,
    }
}

async fn wait_for_terminal(store: &Arc<dyn TaskStore>, id: TaskId) -> TaskStatus {
    for _ in 0..500 {
        let task = store.get_task(id).await.unwrap().unwrap();
        if task.is_terminal() {
            return task.status;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan task never reached a terminal state");
}

// ---------------------------------------------------------------------
// Scenarios

#[tokio::test]
async fn happy_scan_matches_links_and_completes() {
    let fixture = fixture(&["Ann Leckie", "Ted Chiang", "Becky Chambers"]);
    fixture.manager.start_workers().await.unwrap();

    let task_id = fixture
        .scans
        .scan_library(LibraryId(1), 1, None)
        .await
        .unwrap();

    let status = wait_for_terminal(&fixture.store, task_id).await;
    assert_eq!(status, TaskStatus::Completed);

    // Three metadata rows and three exact-name mappings at 0.90.
    let metadata = fixture.graph.metadata();
    assert_eq!(metadata.len(), 3);
    assert!(metadata.iter().all(|m| m.external_key.is_some()));

    let mappings = fixture.graph.mappings();
    assert_eq!(mappings.len(), 3);
    for mapping in &mappings {
        assert_eq!(mapping.matched_by, Some(MatchMethod::Exact));
        assert_eq!(mapping.confidence_score, Some(0.90));
    }

    // All progress counters were torn down when the job drained.
    use fundamental_core::messaging::BrokerKv as _;
    for key in [
        "scan:progress:1:total",
        "scan:progress:1:processed",
        "scan:progress:1:task_id",
    ] {
        assert!(!fixture.broker.exists(key).await.unwrap(), "{key} leaked");
    }

    fixture.manager.stop_workers().await.unwrap();
}

#[tokio::test]
async fn cancellation_mid_scan_drains_without_db_writes() {
    let fixture = fixture(&["A One", "B Two", "C Three"]);

    // Simulate crawl having already fanned out, then a cancel arriving
    // before the match workers pick anything up.
    let scan_broker: Arc<dyn ScanBroker> = Arc::clone(&fixture.broker) as _;
    let tracker = JobProgressTracker::new(Arc::clone(&scan_broker));

    let task = fixture
        .store
        .create_task(TaskType::LibraryScan, 1, None)
        .await
        .unwrap();
    fixture.store.start_task(task.id).await.unwrap();

    tracker
        .initialize_job(LibraryId(1), 3, Some(task.id))
        .await
        .unwrap();
    for (idx, name) in ["A One", "B Two", "C Three"].iter().enumerate() {
        scan_broker
            .publish(
                "match_queue",
                serde_json::json!({
                    "task_id": task.id,
                    "library_id": 1,
                    "author": {"id": idx as i64 + 1, "name": name},
                }),
            )
            .await
            .unwrap();
    }
    tracker.mark_cancelled(task.id).await.unwrap();

    fixture.manager.start_workers().await.unwrap();

    let status = wait_for_terminal(&fixture.store, task.id).await;
    assert_eq!(status, TaskStatus::Cancelled);

    // The cancelled items drained the counters without touching the
    // author graph.
    assert!(fixture.graph.mappings().is_empty());
    assert!(fixture.graph.metadata().is_empty());

    use fundamental_core::messaging::BrokerKv as _;
    assert!(
        !fixture
            .broker
            .exists("scan:progress:1:processed")
            .await
            .unwrap()
    );

    fixture.manager.stop_workers().await.unwrap();
}

#[tokio::test]
async fn empty_library_completes_without_fanout() {
    let fixture = fixture(&[]);
    fixture.manager.start_workers().await.unwrap();

    let task_id = fixture
        .scans
        .scan_library(LibraryId(1), 1, None)
        .await
        .unwrap();

    let status = wait_for_terminal(&fixture.store, task_id).await;
    assert_eq!(status, TaskStatus::Completed);
    assert!(fixture.graph.mappings().is_empty());

    fixture.manager.stop_workers().await.unwrap();
}

#[tokio::test]
async fn scan_for_unknown_library_is_an_error() {
    let fixture = fixture(&[]);
    let result = fixture.scans.scan_library(LibraryId(99), 1, None).await;
    assert!(result.is_err());
}
