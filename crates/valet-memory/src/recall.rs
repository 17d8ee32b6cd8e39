// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory recall: selects the most relevant facts for a user and renders
//! them as a context block for prompt injection.

use chrono::{DateTime, Utc};
use tracing::debug;
use valet_core::types::FactCategory;
use valet_core::ValetError;
use valet_storage::queries::facts;
use valet_storage::Database;

use crate::scoring::relevance_score;

/// Select the top `limit` facts by relevance and render them grouped by
/// category. Returns `None` when the user has no stored facts. Only the
/// injected facts get their access counters bumped.
pub async fn build_context_block(
    db: &Database,
    user_id: &str,
    limit: usize,
) -> Result<Option<String>, ValetError> {
    build_context_block_at(db, user_id, limit, Utc::now()).await
}

/// Clock-injectable variant of [`build_context_block`] for deterministic tests.
pub async fn build_context_block_at(
    db: &Database,
    user_id: &str,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<Option<String>, ValetError> {
    let all = facts::get_all_facts(db, user_id).await?;
    if all.is_empty() {
        return Ok(None);
    }

    let mut scored: Vec<_> = all
        .into_iter()
        .map(|fact| (relevance_score(&fact, now), fact))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    let mut block = String::from("Things you remember about this user:\n");
    for category in FactCategory::all() {
        let in_category: Vec<_> = scored
            .iter()
            .filter(|(_, f)| FactCategory::from_str_value(&f.category) == category)
            .collect();
        if in_category.is_empty() {
            continue;
        }
        block.push_str(&format!("\n{}:\n", category.as_str()));
        for (_, fact) in in_category {
            block.push_str(&format!("- {}\n", fact.fact));
        }
    }

    let ids: Vec<i64> = scored.iter().map(|(_, f)| f.id).collect();
    debug!(user_id, injected = ids.len(), "built memory context block");
    facts::mark_accessed(db, ids).await?;

    Ok(Some(block))
}
