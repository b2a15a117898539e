//! Duplicate pair detection.

use std::collections::HashSet;

use tracing::debug;

use fundamental_model::{AuthorMetadata, AuthorMetadataId};

use crate::matching::{normalize_name, similarity};

use super::scorer::QualityScorer;

const DEFAULT_MIN_SIMILARITY: f64 = 0.85;

/// A metadata row together with its persisted alternate names.
#[derive(Clone, Debug)]
pub struct DuplicateRecord {
    pub metadata: AuthorMetadata,
    pub alternate_names: Vec<String>,
}

/// Two records judged to be the same author, ordered by quality.
#[derive(Clone, Debug)]
pub struct DuplicatePair {
    pub keep: AuthorMetadataId,
    pub merge: AuthorMetadataId,
    pub keep_score: f64,
    pub merge_score: f64,
}

/// Detects duplicate authors from persisted data only (no API calls).
#[derive(Clone, Copy, Debug)]
pub struct DuplicateDetector {
    min_similarity: f64,
    scorer: QualityScorer,
}

impl Default for DuplicateDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SIMILARITY)
    }
}

impl DuplicateDetector {
    pub fn new(min_similarity: f64) -> Self {
        Self {
            min_similarity,
            scorer: QualityScorer,
        }
    }

    /// Whether two records describe the same author, by normalized-name
    /// similarity, also comparing alternate names cross-product.
    pub fn are_duplicates(&self, a: &DuplicateRecord, b: &DuplicateRecord) -> bool {
        if a.metadata.id == b.metadata.id {
            return false;
        }

        let name_a = normalize_name(&a.metadata.name);
        let name_b = normalize_name(&b.metadata.name);
        if similarity(&name_a, &name_b) >= self.min_similarity {
            debug!(
                "Duplicate detected: '{}' ({}) and '{}' ({})",
                a.metadata.name, a.metadata.id, b.metadata.name, b.metadata.id
            );
            return true;
        }

        for alt_a in &a.alternate_names {
            let norm_a = normalize_name(alt_a);
            for alt_b in &b.alternate_names {
                if similarity(&norm_a, &normalize_name(alt_b)) >= self.min_similarity {
                    debug!(
                        "Duplicate detected via alternate names: '{}' and '{}'",
                        alt_a, alt_b
                    );
                    return true;
                }
            }
        }

        false
    }

    /// Score both sides and order them keep-first.
    pub fn score_pair(&self, a: &DuplicateRecord, b: &DuplicateRecord) -> DuplicatePair {
        let score_a = self.scorer.score(&a.metadata);
        let score_b = self.scorer.score(&b.metadata);

        if score_a >= score_b {
            DuplicatePair {
                keep: a.metadata.id,
                merge: b.metadata.id,
                keep_score: score_a,
                merge_score: score_b,
            }
        } else {
            DuplicatePair {
                keep: b.metadata.id,
                merge: a.metadata.id,
                keep_score: score_b,
                merge_score: score_a,
            }
        }
    }

    /// Lazily emit duplicate pairs across all unordered record pairs. A
    /// record already marked for merging is never matched again.
    pub fn find_duplicates<'a>(
        &'a self,
        records: &'a [DuplicateRecord],
    ) -> impl Iterator<Item = DuplicatePair> + 'a {
        DuplicateIter {
            detector: self,
            records,
            outer: 0,
            inner: 1,
            merged: HashSet::new(),
        }
    }
}

struct DuplicateIter<'a> {
    detector: &'a DuplicateDetector,
    records: &'a [DuplicateRecord],
    outer: usize,
    inner: usize,
    merged: HashSet<i64>,
}

impl Iterator for DuplicateIter<'_> {
    type Item = DuplicatePair;

    fn next(&mut self) -> Option<Self::Item> {
        while self.outer < self.records.len() {
            let a = &self.records[self.outer];
            if self.merged.contains(&a.metadata.id.as_i64()) {
                self.outer += 1;
                self.inner = self.outer + 1;
                continue;
            }

            while self.inner < self.records.len() {
                let b = &self.records[self.inner];
                self.inner += 1;

                if self.merged.contains(&b.metadata.id.as_i64()) {
                    continue;
                }
                if self.detector.are_duplicates(a, b) {
                    let pair = self.detector.score_pair(a, b);
                    self.merged.insert(pair.merge.as_i64());
                    return Some(pair);
                }
            }

            self.outer += 1;
            self.inner = self.outer + 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(id: i64, name: &str, work_count: Option<i32>) -> DuplicateRecord {
        DuplicateRecord {
            metadata: AuthorMetadata {
                id: AuthorMetadataId(id),
                external_key: Some(format!("OL{id}A")),
                name: name.into(),
                personal_name: None,
                fuller_name: None,
                title: None,
                birth_date: None,
                death_date: None,
                entity_type: None,
                biography: None,
                location: None,
                photo_url: None,
                work_count,
                ratings_average: None,
                ratings_count: None,
                top_work: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                last_synced_at: None,
            },
            alternate_names: Vec::new(),
        }
    }

    #[test]
    fn near_identical_names_are_duplicates() {
        let detector = DuplicateDetector::default();
        // "john smith" vs "john smyth": 1 edit over 10 chars = 0.9.
        assert!(detector.are_duplicates(
            &record(1, "John Smith", None),
            &record(2, "John Smyth", None)
        ));
    }

    #[test]
    fn distinct_names_are_not_duplicates() {
        let detector = DuplicateDetector::default();
        assert!(!detector.are_duplicates(
            &record(1, "John Smith", None),
            &record(2, "Jane Austen", None)
        ));
    }

    #[test]
    fn alternate_names_are_compared_cross_product() {
        let detector = DuplicateDetector::default();
        let mut a = record(1, "Richard Bachman", None);
        a.alternate_names = vec!["Stephen King".into()];
        let mut b = record(2, "S. King", None);
        b.alternate_names = vec!["Stephen Kinng".into()];

        assert!(detector.are_duplicates(&a, &b));
    }

    #[test]
    fn higher_quality_record_is_kept() {
        let detector = DuplicateDetector::default();
        let rich = record(1, "John Smith", Some(90));
        let poor = record(2, "John Smyth", Some(1));

        let pair = detector.score_pair(&poor, &rich);
        assert_eq!(pair.keep, AuthorMetadataId(1));
        assert_eq!(pair.merge, AuthorMetadataId(2));
        assert!(pair.keep_score > pair.merge_score);
    }

    #[test]
    fn a_merged_record_is_not_paired_twice() {
        let detector = DuplicateDetector::default();
        let records = vec![
            record(1, "John Smith", Some(50)),
            record(2, "John Smyth", Some(1)),
            record(3, "John Smithe", Some(2)),
        ];

        let pairs: Vec<DuplicatePair> = detector.find_duplicates(&records).collect();
        // Record 1 wins both comparisons; 2 and 3 each merge exactly once.
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.keep == AuthorMetadataId(1)));
        let merged: HashSet<i64> = pairs.iter().map(|p| p.merge.as_i64()).collect();
        assert_eq!(merged, HashSet::from([2, 3]));
    }

    #[test]
    fn no_duplicates_yields_nothing() {
        let detector = DuplicateDetector::default();
        let records = vec![
            record(1, "John Smith", None),
            record(2, "Ursula K. Le Guin", None),
        ];
        assert_eq!(detector.find_duplicates(&records).count(), 0);
    }
}
