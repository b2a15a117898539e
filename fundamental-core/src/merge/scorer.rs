//! Record quality scoring.

use chrono::Utc;

use fundamental_model::AuthorMetadata;

/// Scores an author record; higher means "keep this one".
///
/// Components: work count (≤ 40), ratings volume (≤ 30), field
/// completeness (≤ 20), sync recency (≤ 10).
#[derive(Clone, Copy, Debug, Default)]
pub struct QualityScorer;

impl QualityScorer {
    pub fn score(&self, author: &AuthorMetadata) -> f64 {
        self.work_count_score(author)
            + self.ratings_score(author)
            + self.completeness_score(author)
            + self.recency_score(author)
    }

    /// 0.4 points per work, capped at 40 (100 works).
    fn work_count_score(&self, author: &AuthorMetadata) -> f64 {
        match author.work_count {
            Some(count) => (f64::from(count) * 0.4).min(40.0),
            None => 0.0,
        }
    }

    /// Up to 30 points, maxed at 10 000 ratings.
    fn ratings_score(&self, author: &AuthorMetadata) -> f64 {
        match author.ratings_count {
            Some(count) => (f64::from(count) / 10_000.0 * 30.0).min(30.0),
            None => 0.0,
        }
    }

    /// Weighted sum of populated fields, doubled, capped at 20.
    fn completeness_score(&self, author: &AuthorMetadata) -> f64 {
        let mut completeness = 0u32;
        let weighted: [(bool, u32); 9] = [
            (author.biography.is_some(), 3),
            (author.birth_date.is_some(), 2),
            (author.death_date.is_some(), 2),
            (author.location.is_some(), 2),
            (author.photo_url.is_some(), 2),
            (author.personal_name.is_some(), 1),
            (author.fuller_name.is_some(), 1),
            (author.title.is_some(), 1),
            (author.top_work.is_some(), 1),
        ];
        for (populated, weight) in weighted {
            if populated {
                completeness += weight;
            }
        }
        if author.ratings_average.is_some() {
            completeness += 1;
        }
        (f64::from(completeness) * 2.0).min(20.0)
    }

    /// Linear decay over a year since the last sync; records that never
    /// synced get a small floor instead of zero.
    fn recency_score(&self, author: &AuthorMetadata) -> f64 {
        let Some(last_synced) = author.last_synced_at else {
            return 2.0;
        };
        let days_since = Utc::now()
            .signed_duration_since(last_synced)
            .num_seconds() as f64
            / 86_400.0;
        (10.0 - days_since / 365.0 * 10.0).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use fundamental_model::AuthorMetadataId;

    use super::*;

    fn bare(id: i64, name: &str) -> AuthorMetadata {
        AuthorMetadata {
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
            work_count: None,
            ratings_average: None,
            ratings_count: None,
            top_work: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            last_synced_at: None,
        }
    }

    #[test]
    fn empty_records_only_get_the_recency_floor() {
        let score = QualityScorer.score(&bare(1, "John Smith"));
        assert_eq!(score, 2.0);
    }

    #[test]
    fn work_count_caps_at_forty() {
        let mut author = bare(1, "John Smith");
        author.work_count = Some(50);
        assert_eq!(QualityScorer.score(&author), 20.0 + 2.0);

        author.work_count = Some(1000);
        assert_eq!(QualityScorer.score(&author), 40.0 + 2.0);
    }

    #[test]
    fn ratings_cap_at_thirty() {
        let mut author = bare(1, "John Smith");
        author.ratings_count = Some(5_000);
        assert_eq!(QualityScorer.score(&author), 15.0 + 2.0);

        author.ratings_count = Some(1_000_000);
        assert_eq!(QualityScorer.score(&author), 30.0 + 2.0);
    }

    #[test]
    fn completeness_weights_fields() {
        let mut author = bare(1, "John Smith");
        author.biography = Some("...".into());
        author.birth_date = Some("1960".into());
        // (3 + 2) * 2 = 10 completeness points plus the recency floor.
        assert_eq!(QualityScorer.score(&author), 10.0 + 2.0);
    }

    #[test]
    fn a_fresh_sync_beats_the_floor() {
        let mut fresh = bare(1, "John Smith");
        fresh.last_synced_at = Some(Utc::now());
        let mut stale = bare(2, "John Smith");
        stale.last_synced_at = Some(Utc::now() - TimeDelta::days(400));

        assert!(QualityScorer.score(&fresh) > 9.9);
        assert_eq!(QualityScorer.score(&stale), 0.0);
    }

    #[test]
    fn richer_records_outscore_sparser_ones() {
        let mut rich = bare(1, "John Smith");
        rich.work_count = Some(80);
        rich.biography = Some("Long biography".into());
        rich.photo_url = Some("https://example.com/p.jpg".into());
        rich.last_synced_at = Some(Utc::now());

        let mut sparse = bare(2, "John Smyth");
        sparse.work_count = Some(3);

        assert!(QualityScorer.score(&rich) > QualityScorer.score(&sparse));
    }
}
