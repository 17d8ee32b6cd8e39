// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `valet status` command implementation.
//!
//! Reads cumulative usage from the query log and lists recent sessions,
//! straight from the database so it works whether or not the agent is up.

use valet_config::ValetConfig;
use valet_core::types::Session;
use valet_core::ValetError;
use valet_storage::queries::query_log::{self, UsageSummary};
use valet_storage::queries::{facts, sessions};
use valet_storage::Database;

const RECENT_SESSIONS: usize = 5;

/// Run the `valet status` command for one user.
pub async fn run_status(config: &ValetConfig, user_id: &str) -> Result<(), ValetError> {
    let db = Database::open_with(&config.storage.database_path, config.storage.wal_mode).await?;

    let summary = query_log::usage_summary(&db, user_id).await?;
    let fact_count = facts::count_facts(&db, user_id).await?;
    let recent = sessions::get_recent_sessions(&db, user_id, RECENT_SESSIONS).await?;

    print!("{}", render_status(user_id, &summary, fact_count, &recent));
    Ok(())
}

fn render_status(
    user_id: &str,
    summary: &UsageSummary,
    fact_count: i64,
    recent: &[Session],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("valet status for {user_id}\n"));
    out.push_str(&format!("  queries:       {}\n", summary.queries));
    out.push_str(&format!("  input tokens:  {}\n", summary.input_tokens));
    out.push_str(&format!("  output tokens: {}\n", summary.output_tokens));
    out.push_str(&format!("  total cost:    {}\n", format_cost(summary.cost_usd)));
    out.push_str(&format!("  memory facts:  {fact_count}\n"));

    if recent.is_empty() {
        out.push_str("no sessions yet\n");
    } else {
        out.push_str("recent sessions:\n");
        for session in recent {
            out.push_str(&format!(
                "  {}  {} ({})\n",
                session.last_active_at, session.title, session.model
            ));
        }
    }
    out
}

fn format_cost(cost_usd: f64) -> String {
    format!("${cost_usd:.4}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_renders_with_four_decimals() {
        assert_eq!(format_cost(0.0), "$0.0000");
        assert_eq!(format_cost(0.01234), "$0.0123");
        assert_eq!(format_cost(1.5), "$1.5000");
    }

    #[test]
    fn status_lists_sessions_newest_first_as_given() {
        let summary = UsageSummary {
            queries: 3,
            input_tokens: 120,
            output_tokens: 45,
            cost_usd: 0.0123,
        };
        let recent = vec![Session {
            user_id: "console".into(),
            session_id: "s1".into(),
            model: "claude-sonnet-4-20250514".into(),
            title: "capital of France?".into(),
            created_at: "2026-08-24T10:00:00Z".into(),
            last_active_at: "2026-08-24T10:05:00Z".into(),
        }];

        let rendered = render_status("console", &summary, 7, &recent);
        assert!(rendered.contains("queries:       3"));
        assert!(rendered.contains("$0.0123"));
        assert!(rendered.contains("memory facts:  7"));
        assert!(rendered.contains("capital of France? (claude-sonnet-4-20250514)"));
    }

    #[test]
    fn status_without_sessions_says_so() {
        let rendered = render_status("console", &UsageSummary::default(), 0, &[]);
        assert!(rendered.contains("no sessions yet"));
    }

    #[tokio::test]
    async fn status_reads_from_an_empty_store() {
        let db = Database::open_in_memory().await.unwrap();
        let summary = query_log::usage_summary(&db, "console").await.unwrap();
        assert_eq!(summary.queries, 0);
        let count = facts::count_facts(&db, "console").await.unwrap();
        assert_eq!(count, 0);
    }
}
