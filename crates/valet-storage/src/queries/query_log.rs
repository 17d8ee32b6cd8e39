// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only query analytics.

use rusqlite::params;
use valet_core::ValetError;

use crate::database::{map_tr_err, Database};
use crate::models::QueryLogEntry;

const PREVIEW_CHARS: usize = 50;

/// Aggregate usage for a user, used by the status report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub queries: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

/// Append one query record. The prompt is truncated to a short preview so
/// the log never stores full conversation text.
pub async fn log_query(
    db: &Database,
    user_id: &str,
    prompt: &str,
    latency_ms: i64,
    input_tokens: i64,
    output_tokens: i64,
    cost_usd: f64,
    tools: &[String],
) -> Result<(), ValetError> {
    let user_id = user_id.to_string();
    let preview: String = prompt.chars().take(PREVIEW_CHARS).collect();
    let tools = tools.join(",");
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO query_log (user_id, prompt_preview, latency_ms, input_tokens, output_tokens, cost_usd, tools)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![user_id, preview, latency_ms, input_tokens, output_tokens, cost_usd, tools],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Most recent query records for a user, newest first.
pub async fn recent_queries(
    db: &Database,
    user_id: &str,
    limit: usize,
) -> Result<Vec<QueryLogEntry>, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, prompt_preview, latency_ms, input_tokens, output_tokens, cost_usd, tools, created_at
                 FROM query_log WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let entries = stmt
                .query_map(params![user_id, limit as i64], |row| {
                    Ok(QueryLogEntry {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        prompt_preview: row.get(2)?,
                        latency_ms: row.get(3)?,
                        input_tokens: row.get(4)?,
                        output_tokens: row.get(5)?,
                        cost_usd: row.get(6)?,
                        tools: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
        .map_err(map_tr_err)
}

/// Lifetime usage aggregates for a user.
pub async fn usage_summary(db: &Database, user_id: &str) -> Result<UsageSummary, ValetError> {
    let user_id = user_id.to_string();
    db.connection()
        .call(move |conn| {
            let summary = conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(input_tokens), 0),
                        COALESCE(SUM(output_tokens), 0),
                        COALESCE(SUM(cost_usd), 0)
                 FROM query_log WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UsageSummary {
                        queries: row.get(0)?,
                        input_tokens: row.get(1)?,
                        output_tokens: row.get(2)?,
                        cost_usd: row.get(3)?,
                    })
                },
            )?;
            Ok(summary)
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_and_read_back() {
        let db = Database::open_in_memory().await.unwrap();
        log_query(&db, "u1", "what is the weather", 850, 120, 340, 0.0031, &["web_search".into()])
            .await
            .unwrap();

        let entries = recent_queries(&db, "u1", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prompt_preview, "what is the weather");
        assert_eq!(entries[0].tools, "web_search");
        assert_eq!(entries[0].latency_ms, 850);
    }

    #[tokio::test]
    async fn long_prompts_are_truncated_on_char_boundaries() {
        let db = Database::open_in_memory().await.unwrap();
        // Multibyte input longer than the preview window.
        let prompt = "é".repeat(80);
        log_query(&db, "u1", &prompt, 10, 0, 0, 0.0, &[]).await.unwrap();

        let entries = recent_queries(&db, "u1", 1).await.unwrap();
        assert_eq!(entries[0].prompt_preview.chars().count(), 50);
    }

    #[tokio::test]
    async fn usage_summary_aggregates_per_user() {
        let db = Database::open_in_memory().await.unwrap();
        log_query(&db, "u1", "a", 10, 100, 200, 0.01, &[]).await.unwrap();
        log_query(&db, "u1", "b", 10, 50, 75, 0.005, &[]).await.unwrap();
        log_query(&db, "u2", "c", 10, 999, 999, 1.0, &[]).await.unwrap();

        let summary = usage_summary(&db, "u1").await.unwrap();
        assert_eq!(summary.queries, 2);
        assert_eq!(summary.input_tokens, 150);
        assert_eq!(summary.output_tokens, 275);
        assert!((summary.cost_usd - 0.015).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_summary_is_zero() {
        let db = Database::open_in_memory().await.unwrap();
        let summary = usage_summary(&db, "nobody").await.unwrap();
        assert_eq!(summary, UsageSummary::default());
    }
}
