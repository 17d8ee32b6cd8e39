// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Long-term memory fact storage with FTS5 keyword search.
//!
//! Facts are unique per (user, text). Saving an existing fact refreshes it
//! in place instead of inserting a duplicate. Reads that serve recall bump
//! the access counters so relevance scoring can favor frequently used facts.

use rusqlite::params;
use tracing::debug;
use valet_core::ValetError;

use crate::database::{map_tr_err, Database};
use crate::models::{FactCategory, MemoryFact};
use crate::now_iso;

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryFact> {
    Ok(MemoryFact {
        id: row.get(0)?,
        user_id: row.get(1)?,
        fact: row.get(2)?,
        category: row.get(3)?,
        source: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        last_accessed_at: row.get(7)?,
        access_count: row.get(8)?,
    })
}

const FACT_COLUMNS: &str =
    "id, user_id, fact, category, source, created_at, updated_at, last_accessed_at, access_count";

// Qualified for joins against facts_fts, which has its own `fact` column.
const FACT_COLUMNS_QUALIFIED: &str =
    "facts.id, facts.user_id, facts.fact, facts.category, facts.source, facts.created_at, \
     facts.updated_at, facts.last_accessed_at, facts.access_count";

/// Save a fact, refreshing it in place if the same text already exists for
/// the user. Returns the fact's row id.
pub async fn save_fact(
    db: &Database,
    user_id: &str,
    fact: &str,
    category: FactCategory,
    source: &str,
) -> Result<i64, ValetError> {
    let user_id = user_id.to_string();
    let fact = fact.to_string();
    let source = source.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO facts (user_id, fact, category, source, created_at, updated_at, last_accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?5)
                 ON CONFLICT(user_id, fact) DO UPDATE SET
                     updated_at = excluded.updated_at,
                     category = excluded.category,
                     source = excluded.source",
                params![user_id, fact, category.as_str(), source, now],
            )?;
            let id: i64 = conn.query_row(
                "SELECT id FROM facts WHERE user_id = ?1 AND fact = ?2",
                params![user_id, fact],
                |row| row.get(0),
            )?;
            Ok(id)
        })
        .await
        .map_err(map_tr_err)
}

/// Keyword search over the user's facts, BM25-ranked through the FTS5 index,
/// falling back to a LIKE scan when the query has no FTS matches or is not
/// valid FTS syntax. Returned facts get their access counters bumped.
pub async fn search_facts(
    db: &Database,
    user_id: &str,
    query: &str,
    limit: usize,
) -> Result<Vec<MemoryFact>, ValetError> {
    let user_id = user_id.to_string();
    let query = query.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {FACT_COLUMNS_QUALIFIED} FROM facts
                 JOIN facts_fts ON facts_fts.rowid = facts.id
                 WHERE facts.user_id = ?1 AND facts_fts MATCH ?2
                 ORDER BY bm25(facts_fts) LIMIT ?3"
            );
            // Arbitrary user text is not always valid FTS5 syntax. Treat a
            // parse failure the same as an empty result and fall back.
            let fts_result: rusqlite::Result<Vec<MemoryFact>> = (|| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params![user_id, query, limit as i64], row_to_fact)?;
                rows.collect()
            })();

            let facts = match fts_result {
                Ok(facts) if !facts.is_empty() => facts,
                _ => {
                    debug!(query = %query, "fts search empty or failed, using LIKE fallback");
                    // Escape LIKE wildcards so the keyword matches literally.
                    let escaped = query
                        .replace('\\', "\\\\")
                        .replace('%', "\\%")
                        .replace('_', "\\_");
                    let pattern = format!("%{escaped}%");
                    let sql = format!(
                        "SELECT {FACT_COLUMNS} FROM facts
                         WHERE user_id = ?1 AND fact LIKE ?2 ESCAPE '\\'
                         ORDER BY access_count DESC, updated_at DESC LIMIT ?3"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    let rows =
                        stmt.query_map(params![user_id, pattern, limit as i64], row_to_fact)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                }
            };

            for fact in &facts {
                conn.execute(
                    "UPDATE facts SET access_count = access_count + 1, last_accessed_at = ?1
                     WHERE id = ?2",
                    params![now, fact.id],
                )?;
            }
            Ok(facts)
        })
        .await
        .map_err(map_tr_err)
}

/// All of a user's facts ordered by usefulness, with access counters bumped.
pub async fn get_user_facts(
    db: &Database,
    user_id: &str,
    limit: usize,
) -> Result<Vec<MemoryFact>, ValetError> {
    let user_id = user_id.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE user_id = ?1
                 ORDER BY (access_count > 0) DESC, updated_at DESC LIMIT ?2"
            );
            let mut stmt = conn.prepare(&sql)?;
            let facts = stmt
                .query_map(params![user_id, limit as i64], row_to_fact)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for fact in &facts {
                conn.execute(
                    "UPDATE facts SET access_count = access_count + 1, last_accessed_at = ?1
                     WHERE id = ?2",
                    params![now, fact.id],
                )?;
            }
            Ok(facts)
        })
        .await
        .map_err(map_tr_err)
}

/// Facts in one category, ordered by usefulness, with access counters bumped.
pub async fn get_facts_by_category(
    db: &Database,
    user_id: &str,
    category: FactCategory,
    limit: usize,
) -> Result<Vec<MemoryFact>, ValetError> {
    let user_id = user_id.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE user_id = ?1 AND category = ?2
                 ORDER BY (access_count > 0) DESC, updated_at DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let facts = stmt
                .query_map(params![user_id, category.as_str(), limit as i64], row_to_fact)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for fact in &facts {
                conn.execute(
                    "UPDATE facts SET access_count = access_count + 1, last_accessed_at = ?1
                     WHERE id = ?2",
                    params![now, fact.id],
                )?;
            }
            Ok(facts)
        })
        .await
        .map_err(map_tr_err)
}

/// All of a user's facts without touching access counters. Used by relevance
/// scoring and consolidation, which must not distort the usage signal.
pub async fn get_all_facts(db: &Database, user_id: &str) -> Result<Vec<MemoryFact>, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {FACT_COLUMNS} FROM facts WHERE user_id = ?1 ORDER BY id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let facts = stmt
                .query_map(params![user_id], row_to_fact)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(facts)
        })
        .await
        .map_err(map_tr_err)
}

/// Bump access counters for the given fact ids. Recall calls this for only
/// the facts it actually injected into context.
pub async fn mark_accessed(db: &Database, ids: Vec<i64>) -> Result<(), ValetError> {
    if ids.is_empty() {
        return Ok(());
    }
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                tx.execute(
                    "UPDATE facts SET access_count = access_count + 1, last_accessed_at = ?1
                     WHERE id = ?2",
                    params![now, id],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Delete a single fact by id. Returns whether a row was removed.
pub async fn delete_fact(db: &Database, user_id: &str, id: i64) -> Result<bool, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.execute(
                "DELETE FROM facts WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
            )?;
            Ok(n > 0)
        })
        .await
        .map_err(map_tr_err)
}

/// Number of facts stored for a user.
pub async fn count_facts(db: &Database, user_id: &str) -> Result<i64, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM facts WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(map_tr_err)
}

/// Users who have at least `min` facts. Drives the consolidation scheduler.
pub async fn users_with_min_facts(db: &Database, min: i64) -> Result<Vec<String>, ValetError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM facts GROUP BY user_id HAVING COUNT(*) >= ?1",
            )?;
            let users = stmt
                .query_map(params![min], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(users)
        })
        .await
        .map_err(map_tr_err)
}

/// Apply one consolidation merge atomically: delete the merged facts and
/// insert their replacement in a single transaction, so a failure partway
/// through never loses facts.
pub async fn apply_consolidation_merge(
    db: &Database,
    user_id: &str,
    delete_ids: Vec<i64>,
    replacement_fact: &str,
    category: FactCategory,
) -> Result<i64, ValetError> {
    let user_id = user_id.to_string();
    let replacement = replacement_fact.to_string();
    let now = now_iso();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;
            for id in &delete_ids {
                tx.execute(
                    "DELETE FROM facts WHERE user_id = ?1 AND id = ?2",
                    params![user_id, id],
                )?;
            }
            tx.execute(
                "INSERT INTO facts (user_id, fact, category, source, created_at, updated_at, last_accessed_at)
                 VALUES (?1, ?2, ?3, 'consolidated', ?4, ?4, ?4)
                 ON CONFLICT(user_id, fact) DO UPDATE SET
                     updated_at = excluded.updated_at,
                     category = excluded.category,
                     source = excluded.source",
                params![user_id, replacement, category.as_str(), now],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM facts WHERE user_id = ?1 AND fact = ?2",
                params![user_id, replacement],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(id)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_db() -> Database {
        let db = Database::open_in_memory().await.unwrap();
        save_fact(&db, "u1", "prefers dark roast coffee", FactCategory::Preference, "explicit")
            .await
            .unwrap();
        save_fact(&db, "u1", "works on the billing service", FactCategory::Project, "extracted")
            .await
            .unwrap();
        save_fact(&db, "u2", "prefers tea", FactCategory::Preference, "explicit")
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn duplicate_save_refreshes_instead_of_inserting() {
        let db = Database::open_in_memory().await.unwrap();
        let id1 = save_fact(&db, "u1", "uses vim", FactCategory::Workflow, "explicit")
            .await
            .unwrap();
        let id2 = save_fact(&db, "u1", "uses vim", FactCategory::Technical, "extracted")
            .await
            .unwrap();
        assert_eq!(id1, id2);
        assert_eq!(count_facts(&db, "u1").await.unwrap(), 1);

        let facts = get_all_facts(&db, "u1").await.unwrap();
        assert_eq!(facts[0].category, "technical");
        assert_eq!(facts[0].source, "extracted");
    }

    #[tokio::test]
    async fn search_hits_fts_index() {
        let db = seeded_db().await;
        let hits = search_facts(&db, "u1", "coffee", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].fact.contains("dark roast"));
    }

    #[tokio::test]
    async fn search_is_scoped_to_user() {
        let db = seeded_db().await;
        let hits = search_facts(&db, "u2", "coffee", 10).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_by_match_quality_not_access_count() {
        let db = Database::open_in_memory().await.unwrap();
        save_fact(&db, "u1", "espresso", FactCategory::Preference, "explicit")
            .await
            .unwrap();
        save_fact(
            &db,
            "u1",
            "sometimes drinks espresso while travelling through italy in winter",
            FactCategory::Personal,
            "extracted",
        )
        .await
        .unwrap();
        // Heavily accessed long fact must not outrank the tighter match.
        let all = get_all_facts(&db, "u1").await.unwrap();
        let long = all.iter().find(|f| f.fact.contains("travelling")).unwrap();
        mark_accessed(&db, vec![long.id; 5]).await.unwrap();

        let hits = search_facts(&db, "u1", "espresso", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].fact, "espresso");
    }

    #[tokio::test]
    async fn like_fallback_treats_wildcards_as_literals() {
        let db = Database::open_in_memory().await.unwrap();
        save_fact(&db, "u1", "budget is 100% spent", FactCategory::Project, "explicit")
            .await
            .unwrap();
        save_fact(&db, "u1", "ran 1000 miles this year", FactCategory::Personal, "explicit")
            .await
            .unwrap();

        // "100%" is invalid FTS5 syntax, so this exercises the LIKE path.
        let hits = search_facts(&db, "u1", "100%", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].fact.contains("100%"));
    }

    #[tokio::test]
    async fn search_falls_back_on_invalid_fts_syntax() {
        let db = seeded_db().await;
        save_fact(&db, "u1", "timezone is UTC+2 (summer)", FactCategory::Personal, "explicit")
            .await
            .unwrap();
        // Unbalanced paren is an FTS5 syntax error; LIKE fallback still finds it.
        let hits = search_facts(&db, "u1", "(summer", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].fact.contains("summer"));
    }

    #[tokio::test]
    async fn search_bumps_access_counters() {
        let db = seeded_db().await;
        search_facts(&db, "u1", "coffee", 10).await.unwrap();
        search_facts(&db, "u1", "coffee", 10).await.unwrap();

        let facts = get_all_facts(&db, "u1").await.unwrap();
        let coffee = facts.iter().find(|f| f.fact.contains("coffee")).unwrap();
        assert_eq!(coffee.access_count, 2);
        let other = facts.iter().find(|f| f.fact.contains("billing")).unwrap();
        assert_eq!(other.access_count, 0);
    }

    #[tokio::test]
    async fn get_all_facts_does_not_bump() {
        let db = seeded_db().await;
        get_all_facts(&db, "u1").await.unwrap();
        let facts = get_all_facts(&db, "u1").await.unwrap();
        assert!(facts.iter().all(|f| f.access_count == 0));
    }

    #[tokio::test]
    async fn category_filter() {
        let db = seeded_db().await;
        let prefs = get_facts_by_category(&db, "u1", FactCategory::Preference, 10)
            .await
            .unwrap();
        assert_eq!(prefs.len(), 1);
        assert!(prefs[0].fact.contains("coffee"));
    }

    #[tokio::test]
    async fn mark_accessed_bumps_only_given_ids() {
        let db = seeded_db().await;
        let facts = get_all_facts(&db, "u1").await.unwrap();
        mark_accessed(&db, vec![facts[0].id]).await.unwrap();

        let facts = get_all_facts(&db, "u1").await.unwrap();
        assert_eq!(facts[0].access_count, 1);
        assert_eq!(facts[1].access_count, 0);
    }

    #[tokio::test]
    async fn delete_fact_removes_row_and_fts_entry() {
        let db = seeded_db().await;
        let facts = get_all_facts(&db, "u1").await.unwrap();
        let coffee = facts.iter().find(|f| f.fact.contains("coffee")).unwrap();

        assert!(delete_fact(&db, "u1", coffee.id).await.unwrap());
        assert!(!delete_fact(&db, "u1", coffee.id).await.unwrap());
        assert!(search_facts(&db, "u1", "coffee", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn users_with_min_facts_filters_by_count() {
        let db = seeded_db().await;
        let users = users_with_min_facts(&db, 2).await.unwrap();
        assert_eq!(users, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn consolidation_merge_is_atomic() {
        let db = seeded_db().await;
        save_fact(&db, "u1", "drinks espresso in the morning", FactCategory::Preference, "extracted")
            .await
            .unwrap();
        let facts = get_all_facts(&db, "u1").await.unwrap();
        let ids: Vec<i64> = facts
            .iter()
            .filter(|f| f.fact.contains("coffee") || f.fact.contains("espresso"))
            .map(|f| f.id)
            .collect();
        assert_eq!(ids.len(), 2);

        apply_consolidation_merge(
            &db,
            "u1",
            ids,
            "prefers strong coffee, espresso in the morning",
            FactCategory::Preference,
        )
        .await
        .unwrap();

        let facts = get_all_facts(&db, "u1").await.unwrap();
        assert_eq!(facts.len(), 2);
        assert!(facts.iter().any(|f| f.source == "consolidated"));
        let hits = search_facts(&db, "u1", "espresso", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].fact.starts_with("prefers strong coffee"));
    }
}
