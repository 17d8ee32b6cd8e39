// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic memory consolidation.
//!
//! When a user accumulates enough facts, a completion pass proposes merges
//! of redundant or overlapping entries. Each merge applies atomically, and
//! a malformed proposal leaves the fact store untouched.

use serde::Deserialize;
use tracing::{debug, info, warn};
use valet_core::traits::QueryProvider;
use valet_core::types::{FactCategory, MemoryFact};
use valet_core::ValetError;
use valet_storage::queries::facts;
use valet_storage::Database;

const CONSOLIDATION_MAX_TOKENS: u32 = 2048;

#[derive(Debug, Deserialize)]
struct MergeProposal {
    merge_ids: Vec<i64>,
    fact: String,
    #[serde(default)]
    category: String,
}

fn consolidation_prompt(facts: &[MemoryFact]) -> String {
    let mut listing = String::new();
    for fact in facts {
        listing.push_str(&format!("{}: [{}] {}\n", fact.id, fact.category, fact.fact));
    }
    format!(
        "These are stored facts about one user, one per line as id: [category] text.\n\n\
         {listing}\n\
         Propose merges of facts that are redundant, overlapping, or better \
         expressed as one. Only merge facts that clearly describe the same \
         thing. Respond with a JSON array only, no prose. Each element: \
         {{\"merge_ids\": [1, 2], \"fact\": \"combined text\", \"category\": \"...\"}}. \
         Respond with [] if nothing should merge."
    )
}

fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Consolidate one user's memory if it has at least `min_facts` entries.
/// Returns the number of merges applied.
pub async fn consolidate_user(
    provider: &dyn QueryProvider,
    db: &Database,
    user_id: &str,
    min_facts: usize,
) -> Result<usize, ValetError> {
    let all = facts::get_all_facts(db, user_id).await?;
    if all.len() < min_facts {
        debug!(user_id, count = all.len(), "below consolidation threshold, skipping");
        return Ok(0);
    }

    let raw = provider
        .complete(&consolidation_prompt(&all), CONSOLIDATION_MAX_TOKENS)
        .await?;

    let proposals: Vec<MergeProposal> = match serde_json::from_str(strip_fence(&raw)) {
        Ok(proposals) => proposals,
        Err(e) => {
            warn!(user_id, error = %e, "consolidation produced unparseable output, dropping");
            return Ok(0);
        }
    };

    let known_ids: std::collections::HashSet<i64> = all.iter().map(|f| f.id).collect();
    let mut applied = 0;
    for proposal in proposals {
        if proposal.merge_ids.len() < 2 {
            continue;
        }
        if proposal.fact.trim().is_empty() {
            continue;
        }
        // Never delete ids the model hallucinated or that belong elsewhere.
        if !proposal.merge_ids.iter().all(|id| known_ids.contains(id)) {
            warn!(user_id, ?proposal.merge_ids, "merge references unknown fact ids, skipping");
            continue;
        }
        let category = FactCategory::from_str_value(&proposal.category);
        facts::apply_consolidation_merge(
            db,
            user_id,
            proposal.merge_ids,
            proposal.fact.trim(),
            category,
        )
        .await?;
        applied += 1;
    }

    if applied > 0 {
        info!(user_id, applied, "memory consolidation applied merges");
    }
    Ok(applied)
}

/// Consolidate every user at or above the fact threshold. One user's failure
/// does not stop the sweep.
pub async fn run_consolidation(
    provider: &dyn QueryProvider,
    db: &Database,
    min_facts: usize,
) -> Result<usize, ValetError> {
    let users = facts::users_with_min_facts(db, min_facts as i64).await?;
    let mut total = 0;
    for user in users {
        match consolidate_user(provider, db, &user, min_facts).await {
            Ok(applied) => total += applied,
            Err(e) => warn!(user_id = %user, error = %e, "consolidation failed for user"),
        }
    }
    Ok(total)
}
