// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relevance scoring for memory facts.
//!
//! Recency decays a base score, frequent access earns a capped bonus, and
//! facts untouched for over a month are penalized so stale knowledge drops
//! out of the recall window before fresh knowledge does.

use chrono::{DateTime, Utc};
use valet_core::types::MemoryFact;

const BASE_SCORE: f64 = 10.0;
const DECAY_PER_DAY: f64 = 1.0;
const ACCESS_BONUS: f64 = 0.5;
const ACCESS_BONUS_CAP: f64 = 5.0;
const STALE_AFTER_DAYS: i64 = 30;

/// Relevance of a fact at time `now`. Higher is more relevant.
///
/// `base - 1.0/day` since last update, floored at zero, plus `0.5` per
/// recorded access capped at `5.0`. The total is halved when the fact has
/// not been accessed in over thirty days.
pub fn relevance_score(fact: &MemoryFact, now: DateTime<Utc>) -> f64 {
    let days_since_update = age_days(&fact.updated_at, now);
    let recency = (BASE_SCORE - DECAY_PER_DAY * days_since_update).max(0.0);

    let bonus = (ACCESS_BONUS * fact.access_count as f64).min(ACCESS_BONUS_CAP);

    let mut score = recency + bonus;
    if age_days(&fact.last_accessed_at, now) > STALE_AFTER_DAYS as f64 {
        score /= 2.0;
    }
    score
}

fn age_days(timestamp: &str, now: DateTime<Utc>) -> f64 {
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(t) => {
            let secs = now.signed_duration_since(t.with_timezone(&Utc)).num_seconds();
            (secs.max(0) as f64) / 86_400.0
        }
        // An unparseable timestamp scores as maximally stale.
        Err(_) => f64::MAX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fact_at(updated_days_ago: i64, accessed_days_ago: i64, access_count: i64) -> (MemoryFact, DateTime<Utc>) {
        let now = Utc::now();
        let fact = MemoryFact {
            id: 1,
            user_id: "u1".into(),
            fact: "prefers rust".into(),
            category: "preference".into(),
            source: "explicit".into(),
            created_at: (now - Duration::days(updated_days_ago)).to_rfc3339(),
            updated_at: (now - Duration::days(updated_days_ago)).to_rfc3339(),
            last_accessed_at: (now - Duration::days(accessed_days_ago)).to_rfc3339(),
            access_count,
        };
        (fact, now)
    }

    #[test]
    fn fresh_fact_scores_base() {
        let (fact, now) = fact_at(0, 0, 0);
        assert!((relevance_score(&fact, now) - 10.0).abs() < 0.01);
    }

    #[test]
    fn score_strictly_decreases_with_age() {
        let mut prev = f64::MAX;
        for days in [0, 1, 3, 5, 8] {
            let (fact, now) = fact_at(days, 0, 0);
            let score = relevance_score(&fact, now);
            assert!(score < prev, "score did not drop at {days} days");
            prev = score;
        }
    }

    #[test]
    fn recency_component_floors_at_zero() {
        let (fact, now) = fact_at(20, 0, 2);
        // Recency exhausted after ten days; only the access bonus remains.
        assert!((relevance_score(&fact, now) - 1.0).abs() < 0.01);
    }

    #[test]
    fn access_bonus_is_capped() {
        let (few, now) = fact_at(0, 0, 4);
        assert!((relevance_score(&few, now) - 12.0).abs() < 0.01);

        let (many, now) = fact_at(0, 0, 1000);
        assert!((relevance_score(&many, now) - 15.0).abs() < 0.01);
    }

    #[test]
    fn long_unaccessed_fact_is_halved() {
        let (recent, now) = fact_at(0, 29, 10);
        let (stale, now2) = fact_at(0, 31, 10);
        let r = relevance_score(&recent, now);
        let s = relevance_score(&stale, now2);
        assert!((r - 15.0).abs() < 0.01);
        assert!((s - 7.5).abs() < 0.01);
    }

    #[test]
    fn garbage_timestamp_scores_zero() {
        let (mut fact, now) = fact_at(0, 0, 0);
        fact.updated_at = "not a timestamp".into();
        fact.last_accessed_at = "not a timestamp".into();
        assert_eq!(relevance_score(&fact, now), 0.0);
    }
}
