//! Age-based refresh decisions shared by matching, ingest, and the scan
//! workers.

use chrono::{DateTime, Utc};

/// Whether previously synced data should be reused instead of
/// refetched.
///
/// Rules:
/// - never synced → refresh;
/// - `max_age_days = None` and `refresh_interval_days = None` → always
///   refresh;
/// - data at or past `max_age_days` → refresh;
/// - data younger than `refresh_interval_days` → skip;
/// - otherwise skip while younger than `max_age_days`.
pub fn should_skip_refresh(
    last_synced_at: Option<DateTime<Utc>>,
    max_age_days: Option<i64>,
    refresh_interval_days: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    if max_age_days.is_none() && refresh_interval_days.is_none() {
        return false;
    }

    let Some(last_synced) = last_synced_at else {
        return false;
    };

    let days_since_sync = now.signed_duration_since(last_synced).num_days();

    if let Some(max_age) = max_age_days
        && days_since_sync >= max_age
    {
        return false;
    }

    if let Some(interval) = refresh_interval_days
        && days_since_sync < interval
    {
        return true;
    }

    max_age_days.is_some_and(|max_age| days_since_sync < max_age)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn synced_days_ago(days: i64) -> Option<DateTime<Utc>> {
        Some(Utc::now() - TimeDelta::days(days))
    }

    #[test]
    fn no_settings_always_refreshes() {
        assert!(!should_skip_refresh(synced_days_ago(1), None, None, Utc::now()));
    }

    #[test]
    fn never_synced_always_refreshes() {
        assert!(!should_skip_refresh(None, Some(30), Some(7), Utc::now()));
    }

    #[test]
    fn data_past_max_age_refreshes() {
        assert!(!should_skip_refresh(
            synced_days_ago(31),
            Some(30),
            None,
            Utc::now()
        ));
        assert!(!should_skip_refresh(
            synced_days_ago(30),
            Some(30),
            Some(7),
            Utc::now()
        ));
    }

    #[test]
    fn data_within_refresh_interval_skips() {
        assert!(should_skip_refresh(
            synced_days_ago(3),
            None,
            Some(7),
            Utc::now()
        ));
        assert!(!should_skip_refresh(
            synced_days_ago(10),
            None,
            Some(7),
            Utc::now()
        ));
    }

    #[test]
    fn fresh_data_within_max_age_skips() {
        assert!(should_skip_refresh(
            synced_days_ago(5),
            Some(30),
            None,
            Utc::now()
        ));
    }

    #[test]
    fn interval_wins_over_max_age_for_young_data() {
        // 3 days old, interval 7: skip even though max age is 30.
        assert!(should_skip_refresh(
            synced_days_ago(3),
            Some(30),
            Some(7),
            Utc::now()
        ));
        // 10 days old, past the interval but inside max age: still skip.
        assert!(should_skip_refresh(
            synced_days_ago(10),
            Some(30),
            Some(7),
            Utc::now()
        ));
    }
}
