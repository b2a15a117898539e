//! Author matching strategies and orchestration.
//!
//! Bridges Calibre authors and external author data through three
//! strategies tried in priority order: identifier comparison, exact
//! normalized-name equality, and Levenshtein fuzzy matching. The
//! orchestrator wraps strategy selection with skip-gating, staleness
//! checks, and unmatched-placeholder bookkeeping.

mod exact;
mod fuzzy;
mod identifier;
mod normalize;
mod orchestrator;
mod strategy;

pub use exact::ExactNameStrategy;
pub use fuzzy::FuzzyNameStrategy;
pub use identifier::IdentifierStrategy;
pub use normalize::{normalize_name, similarity};
pub use orchestrator::{MatchRequestOptions, MatchingOrchestrator};
pub use strategy::{MatchResult, MatchStrategy};
