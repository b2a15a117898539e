//! Distributed scan workers.
//!
//! Each pipeline stage is also realized as a worker subscribing to an
//! input topic and publishing to an output topic, with per-job
//! completion accounting in the broker's key-value side. The per-author
//! chain (match → ingest → link) accounts every item exactly once;
//! whichever worker accounts the final item publishes the job-level
//! message that starts the next phase.

mod completion;
mod crawl;
mod dedup_worker;
mod ingest;
mod link;
mod manager;
mod match_worker;
mod progress;
mod scan_service;
mod score;
pub mod serialization;
mod worker;

pub use completion::CompletionWorker;
pub use crawl::CrawlWorker;
pub use dedup_worker::DeduplicateWorker;
pub use ingest::IngestWorker;
pub use link::LinkWorker;
pub use manager::{ScanWorkerManager, WorkerDependencies};
pub use match_worker::MatchWorker;
pub use progress::JobProgressTracker;
pub use scan_service::LibraryScanningService;
pub use score::ScoreWorker;
pub use worker::{ScanWorker, attach_worker};

/// Topic consumed by [`CrawlWorker`]; one message per scan job.
pub const SCAN_JOBS_TOPIC: &str = "scan_jobs";
/// Per-author topics in pipeline order.
pub const MATCH_QUEUE_TOPIC: &str = "match_queue";
pub const INGEST_QUEUE_TOPIC: &str = "ingest_queue";
pub const LINK_QUEUE_TOPIC: &str = "link_queue";
/// Job-level topics.
pub const DEDUPLICATE_JOBS_TOPIC: &str = "deduplicate_jobs";
pub const SCORE_JOBS_TOPIC: &str = "score_jobs";
pub const COMPLETION_JOBS_TOPIC: &str = "completion_jobs";
