// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Automatic fact extraction from completed exchanges.
//!
//! After each answered query, a cheap completion pass scans the exchange for
//! durable facts about the user. Extraction is best-effort: a malformed
//! model response is logged and dropped, never surfaced to the user.

use serde::Deserialize;
use tracing::{debug, warn};
use valet_core::traits::QueryProvider;
use valet_core::types::FactCategory;
use valet_core::ValetError;
use valet_storage::queries::facts;
use valet_storage::Database;

const EXTRACTION_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Deserialize)]
struct ExtractedFact {
    fact: String,
    #[serde(default)]
    category: String,
}

fn extraction_prompt(prompt: &str, response: &str) -> String {
    format!(
        "Extract durable facts about the user from this exchange. A durable \
         fact is a preference, decision, personal detail, or working context \
         that will still matter in future conversations. Ignore one-off \
         requests and anything about the current task only.\n\n\
         User said:\n{prompt}\n\nAssistant replied:\n{response}\n\n\
         Respond with a JSON array only, no prose. Each element: \
         {{\"fact\": \"...\", \"category\": \"preference|decision|personal|technical|project|workflow|general\"}}. \
         Respond with [] if there is nothing worth remembering."
    )
}

/// Strip a markdown code fence if the model wrapped its JSON in one.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Run fact extraction over one exchange and persist the results.
/// Returns the number of facts saved.
pub async fn extract_facts(
    provider: &dyn QueryProvider,
    db: &Database,
    user_id: &str,
    prompt: &str,
    response: &str,
) -> Result<usize, ValetError> {
    let raw = provider
        .complete(&extraction_prompt(prompt, response), EXTRACTION_MAX_TOKENS)
        .await?;

    let parsed: Vec<ExtractedFact> = match serde_json::from_str(strip_fence(&raw)) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(user_id, error = %e, "fact extraction produced unparseable output, dropping");
            return Ok(0);
        }
    };

    let mut saved = 0;
    for item in parsed {
        let fact = item.fact.trim();
        if fact.is_empty() {
            continue;
        }
        let category = FactCategory::from_str_value(&item.category);
        facts::save_fact(db, user_id, fact, category, "extracted").await?;
        saved += 1;
    }
    debug!(user_id, saved, "fact extraction complete");
    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use valet_core::types::{QueryRequest, QueryResponse, UsageTotals};
    use valet_storage::queries::facts::get_all_facts;

    struct CannedProvider {
        completion: String,
    }

    #[async_trait]
    impl QueryProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn query(&self, _request: QueryRequest) -> Result<QueryResponse, ValetError> {
            Err(ValetError::Internal("not used in this test".into()))
        }

        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String, ValetError> {
            Ok(self.completion.clone())
        }

        fn usage_totals(&self) -> UsageTotals {
            UsageTotals::default()
        }
    }

    #[tokio::test]
    async fn saves_extracted_facts_with_categories() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = CannedProvider {
            completion: r#"[{"fact": "prefers concise answers", "category": "preference"},
                            {"fact": "deploys on fridays", "category": "workflow"}]"#
                .into(),
        };

        let saved = extract_facts(&provider, &db, "u1", "hi", "hello").await.unwrap();
        assert_eq!(saved, 2);

        let all = get_all_facts(&db, "u1").await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|f| f.source == "extracted"));
        assert!(all.iter().any(|f| f.category == "workflow"));
    }

    #[tokio::test]
    async fn handles_fenced_json() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = CannedProvider {
            completion: "```json\n[{\"fact\": \"uses nix\", \"category\": \"technical\"}]\n```".into(),
        };
        assert_eq!(extract_facts(&provider, &db, "u1", "p", "r").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_output_is_a_noop() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = CannedProvider {
            completion: "Sure! Here are the facts I found: the user likes tea.".into(),
        };
        assert_eq!(extract_facts(&provider, &db, "u1", "p", "r").await.unwrap(), 0);
        assert!(get_all_facts(&db, "u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_category_maps_to_general() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = CannedProvider {
            completion: r#"[{"fact": "lives somewhere", "category": "astrology"}]"#.into(),
        };
        extract_facts(&provider, &db, "u1", "p", "r").await.unwrap();
        let all = get_all_facts(&db, "u1").await.unwrap();
        assert_eq!(all[0].category, "general");
    }

    #[tokio::test]
    async fn empty_array_and_blank_facts_save_nothing() {
        let db = Database::open_in_memory().await.unwrap();
        let provider = CannedProvider {
            completion: r#"[{"fact": "   "}]"#.into(),
        };
        assert_eq!(extract_facts(&provider, &db, "u1", "p", "r").await.unwrap(), 0);
    }
}
