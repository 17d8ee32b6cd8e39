// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cost estimation per model family.

use valet_core::types::TokenUsage;

/// Per-million-token prices (input, output) in USD.
fn rates(model: &str) -> (f64, f64) {
    if model.contains("opus") {
        (15.0, 75.0)
    } else if model.contains("haiku") {
        (0.80, 4.0)
    } else {
        // Sonnet-class default.
        (3.0, 15.0)
    }
}

/// Estimated USD cost for one query. Cache reads bill at a tenth of the
/// input rate; cache writes at 1.25x.
pub fn estimate_cost(model: &str, usage: &TokenUsage) -> f64 {
    let (input_rate, output_rate) = rates(model);
    let per_token = 1e-6;
    f64::from(usage.input_tokens) * input_rate * per_token
        + f64::from(usage.output_tokens) * output_rate * per_token
        + f64::from(usage.cache_read_tokens) * input_rate * 0.1 * per_token
        + f64::from(usage.cache_creation_tokens) * input_rate * 1.25 * per_token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sonnet_cost() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: 0.0,
        };
        let cost = estimate_cost("claude-sonnet-4-20250514", &usage);
        assert!((cost - 18.0).abs() < 1e-6);
    }

    #[test]
    fn haiku_is_cheaper_than_opus() {
        let usage = TokenUsage {
            input_tokens: 10_000,
            output_tokens: 5_000,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: 0.0,
        };
        assert!(
            estimate_cost("claude-3-5-haiku-20241022", &usage)
                < estimate_cost("claude-opus-4-20250514", &usage)
        );
    }

    #[test]
    fn cache_reads_are_discounted() {
        let direct = TokenUsage {
            input_tokens: 100_000,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
            cost_usd: 0.0,
        };
        let cached = TokenUsage {
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 100_000,
            cache_creation_tokens: 0,
            cost_usd: 0.0,
        };
        let model = "claude-sonnet-4-20250514";
        assert!(estimate_cost(model, &cached) < estimate_cost(model, &direct) * 0.2);
    }
}
